//! Asynchronous per-message telemetry, decoupled from the processing hot path.
//!
//! Producing a record is one unbounded channel send; a dedicated writer thread
//! formats each record as a CSV row and flushes it individually. Disk latency is
//! therefore never visible to the message-critical path, while every record that
//! reached classification is durably written even if the process dies right after.

use crate::message::Action;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

/// Column schema of the telemetry log. One row per classified message.
pub const CSV_HEADER: &str = "packet_count,recv_ts,service_start_ts,api_start_ts,api_end_ts,\
service_end_ts,ip,delta,p_value,trust,action,actual_api_time_ms,wait_time_ms,\
total_service_time_ms";

/// Full timing and classification snapshot for a single message.
///
/// Emitted once per message that reached classification, regardless of whether the
/// message was then forwarded, dropped by policy, or shed at a full channel.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub packet_count: u64,
    pub recv_ts: f64,
    pub service_start_ts: f64,
    pub api_start_ts: f64,
    pub api_end_ts: f64,
    pub service_end_ts: f64,
    pub ip: String,
    pub delta: f64,
    pub p_value: f64,
    pub trust: f64,
    pub action: Action,
    pub actual_api_time_ms: f64,
    pub wait_time_ms: f64,
    pub total_service_time_ms: f64,
}

impl TelemetryRecord {
    fn csv_row(&self) -> String {
        format!(
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{},{:.6},{:.4},{:.3},{},{:.3},{:.3},{:.3}",
            self.packet_count,
            self.recv_ts,
            self.service_start_ts,
            self.api_start_ts,
            self.api_end_ts,
            self.service_end_ts,
            self.ip,
            self.delta,
            self.p_value,
            self.trust,
            self.action,
            self.actual_api_time_ms,
            self.wait_time_ms,
            self.total_service_time_ms,
        )
    }
}

/// Cloneable producer handle used by the processing stage.
#[derive(Clone)]
pub struct TelemetrySender {
    tx: Sender<TelemetryRecord>,
}

impl TelemetrySender {
    /// Append one record. Never blocks; a send after the writer shut down is a no-op.
    pub fn record(&self, record: TelemetryRecord) {
        let _ = self.tx.send(record);
    }
}

/// Owns the telemetry log file and the thread draining the record queue.
pub struct TelemetryWriter {
    tx: Option<Sender<TelemetryRecord>>,
    handle: Option<JoinHandle<u64>>,
}

impl TelemetryWriter {
    /// Truncate (or create) the log at `path`, write the header row, and start the
    /// writer thread. The log is reset on every process start by design.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{CSV_HEADER}")?;
        writer.flush()?;
        info!(path = %path.display(), "telemetry log reset");

        let (tx, rx) = unbounded::<TelemetryRecord>();
        let handle = std::thread::Builder::new()
            .name("telemetry-writer".to_string())
            .spawn(move || {
                let mut written: u64 = 0;
                loop {
                    match rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(record) => {
                            // Flush per record: durability over batching efficiency.
                            if let Err(e) = writeln!(writer, "{}", record.csv_row())
                                .and_then(|()| writer.flush())
                            {
                                error!(error = %e, "telemetry write failed");
                            } else {
                                written += 1;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let _ = writer.flush();
                written
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Producer handle for the processing stage.
    pub fn sender(&self) -> TelemetrySender {
        TelemetrySender {
            tx: self
                .tx
                .clone()
                .expect("telemetry writer already closed"),
        }
    }

    /// Drop the producer side and wait for the writer thread to drain the queue.
    ///
    /// Returns the number of records durably written.
    pub fn close(mut self) -> u64 {
        self.tx.take();
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(0),
            None => 0,
        }
    }
}
