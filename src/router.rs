//! Dispatch of classified messages into the bounded priority channels.
//!
//! The two channels form the only backpressure boundary in the system. They are
//! bounded so a stalled forwarder cannot consume unbounded memory, and a full
//! channel sheds the record instead of ever blocking the processing thread.

use crate::message::{Action, PriorityMessage};
use crate::priority::{Priority, PriorityTable};
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Where one classified message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Appended to the channel for this priority.
    Forwarded(Priority),
    /// Policy verdict was drop: recorded in telemetry, never forwarded.
    Dropped,
    /// Channel full or its reader gone; record shed to keep ingestion unblocked.
    Discarded(Priority),
}

/// Routes classification results to the High/Low channels or the drop sink.
pub struct PriorityRouter {
    channels: PriorityTable<Sender<String>>,
    discard_counters: PriorityTable<Arc<AtomicU64>>,
}

impl PriorityRouter {
    /// Build a router over pre-created per-priority channel senders.
    pub fn new(channels: PriorityTable<Sender<String>>) -> Self {
        let discard_counters = PriorityTable::from_fn(|_| Arc::new(AtomicU64::new(0)));
        Self {
            channels,
            discard_counters,
        }
    }

    /// Dispatch one verdict. `enqueued_at` (epoch seconds) is stamped into the
    /// serialized record as the channel enqueue time.
    pub fn route(
        &self,
        action: Action,
        source_ip: &str,
        sequence: u64,
        enqueued_at: f64,
    ) -> RouteOutcome {
        let priority = match action.priority() {
            Some(priority) => priority,
            None => return RouteOutcome::Dropped,
        };

        let message = PriorityMessage {
            ip: source_ip.to_string(),
            count: sequence,
            timestamp: enqueued_at,
            priority,
        };
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(source_ip, sequence, error = %e, "failed to frame priority record");
                self.discard_counters[priority].fetch_add(1, Ordering::Relaxed);
                return RouteOutcome::Discarded(priority);
            }
        };

        match self.channels[priority].try_send(line) {
            Ok(()) => RouteOutcome::Forwarded(priority),
            Err(TrySendError::Full(_)) => {
                warn!(
                    source_ip,
                    sequence,
                    %priority,
                    "priority channel full, dropping message"
                );
                self.discard_counters[priority].fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Discarded(priority)
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(
                    source_ip,
                    sequence,
                    %priority,
                    "priority channel reader absent, dropping message"
                );
                self.discard_counters[priority].fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Discarded(priority)
            }
        }
    }

    /// Per-priority count of records shed at this boundary.
    pub fn discard_counts(&self) -> PriorityTable<u64> {
        PriorityTable::from_fn(|priority| self.discard_counters[priority].load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn router_with_capacity(cap: usize) -> (PriorityRouter, PriorityTable<crossbeam_channel::Receiver<String>>) {
        let mut txs = Vec::new();
        let mut rxs = Vec::new();
        for _ in Priority::ALL {
            let (tx, rx) = bounded(cap);
            txs.push(tx);
            rxs.push(rx);
        }
        (
            PriorityRouter::new(PriorityTable::from_vec(txs)),
            PriorityTable::from_vec(rxs),
        )
    }

    #[test]
    fn actions_route_to_exactly_one_destination() {
        let (router, rxs) = router_with_capacity(4);

        assert_eq!(
            router.route(Action::High, "10.0.0.5", 1, 100.0),
            RouteOutcome::Forwarded(Priority::High)
        );
        assert_eq!(
            router.route(Action::Low, "10.0.0.5", 2, 101.0),
            RouteOutcome::Forwarded(Priority::Low)
        );
        assert_eq!(
            router.route(Action::Drop, "10.0.0.5", 3, 102.0),
            RouteOutcome::Dropped
        );

        assert_eq!(rxs[Priority::High].len(), 1);
        assert_eq!(rxs[Priority::Low].len(), 1);

        let high = PriorityMessage::from_line(&rxs[Priority::High].recv().unwrap()).unwrap();
        assert_eq!(high.count, 1);
        assert_eq!(high.priority, Priority::High);
    }

    #[test]
    fn full_channel_discards_without_blocking() {
        let (router, rxs) = router_with_capacity(1);

        assert_eq!(
            router.route(Action::High, "10.0.0.5", 1, 100.0),
            RouteOutcome::Forwarded(Priority::High)
        );
        // Second record has nowhere to go; the call must return immediately.
        let start = std::time::Instant::now();
        assert_eq!(
            router.route(Action::High, "10.0.0.5", 2, 101.0),
            RouteOutcome::Discarded(Priority::High)
        );
        assert!(start.elapsed() < std::time::Duration::from_millis(10));

        assert_eq!(router.discard_counts()[Priority::High], 1);
        assert_eq!(router.discard_counts()[Priority::Low], 0);
        assert_eq!(rxs[Priority::High].len(), 1);
    }

    #[test]
    fn absent_reader_discards_and_counts() {
        let (router, rxs) = router_with_capacity(4);
        drop(rxs);
        assert_eq!(
            router.route(Action::Low, "10.0.0.5", 1, 100.0),
            RouteOutcome::Discarded(Priority::Low)
        );
        assert_eq!(router.discard_counts()[Priority::Low], 1);
    }
}
