//! Ordered handoff from the ingestion hook to the single processing thread.
//!
//! Producers enqueue from whatever context the broker invokes the hook in; the one
//! consumer drains in arrival order. The channel's own wakeup replaces the original
//! notify-plus-timed-wait scheme, and consumed entries are freed immediately, so no
//! periodic retention sweep is needed.

use crate::message::IngressRecord;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub struct ReceiveQueue {
    sender: Sender<IngressRecord>,
    receiver: Arc<Mutex<Receiver<IngressRecord>>>,
}

impl ReceiveQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            sender: tx,
            receiver: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn sender(&self) -> Sender<IngressRecord> {
        self.sender.clone()
    }

    /// Enqueue one record. Never blocks beyond the channel's internal critical
    /// section; the ingestion hook must not be slowed by downstream stages.
    pub fn push(&self, record: IngressRecord) {
        // Send fails only once the consumer side is gone, i.e. during shutdown.
        let _ = self.sender.send(record);
    }

    /// Dequeue the next record, waiting at most `timeout` so the consumer can
    /// re-check its running flag even if no traffic arrives.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<IngressRecord, RecvTimeoutError> {
        self.receiver.lock().recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<IngressRecord, crossbeam_channel::TryRecvError> {
        self.receiver.lock().try_recv()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.lock().len()
    }
}

impl Default for ReceiveQueue {
    fn default() -> Self {
        Self::new()
    }
}
