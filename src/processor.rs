//! The single processing loop: drain the receive queue, classify, regulate,
//! route, and emit telemetry.
//!
//! Exactly one thread runs this loop; it is the serialization point that gives the
//! pipeline its per-source ordering guarantees. Nothing here ever propagates an
//! error back toward the ingestion hook.

use crate::classifier::Classifier;
use crate::message::{now_secs, ClassificationResult, IngressRecord};
use crate::receive_queue::ReceiveQueue;
use crate::regulator::ServiceTimeRegulator;
use crate::router::PriorityRouter;
use crate::telemetry::{TelemetryRecord, TelemetrySender};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long the consumer blocks on the queue before re-checking the running flag.
const IDLE_RECHECK: Duration = Duration::from_millis(500);

pub struct MessageProcessor {
    queue: Arc<ReceiveQueue>,
    classifier: Box<dyn Classifier + Send>,
    regulator: ServiceTimeRegulator,
    router: PriorityRouter,
    telemetry: TelemetrySender,
}

impl MessageProcessor {
    pub fn new(
        queue: Arc<ReceiveQueue>,
        classifier: Box<dyn Classifier + Send>,
        regulator: ServiceTimeRegulator,
        router: PriorityRouter,
        telemetry: TelemetrySender,
    ) -> Self {
        Self {
            queue,
            classifier,
            regulator,
            router,
            telemetry,
        }
    }

    /// Drive the loop until the shared running flag is cleared.
    ///
    /// Cancellation is cooperative: an in-flight classification finishes (bounded by
    /// its own timeout) before the flag is observed again.
    pub fn run(&self, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            match self.queue.recv_timeout(IDLE_RECHECK) {
                Ok(record) => self.process(record),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Classify and route one record, then emit its telemetry snapshot.
    fn process(&self, record: IngressRecord) {
        let service_start = Instant::now();
        let service_start_ts = now_secs();

        let api_start_ts = now_secs();
        let result = match self.classifier.classify(&record.source_ip, record.delta) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    source_ip = %record.source_ip,
                    sequence = record.sequence,
                    error = %e,
                    "classification failed, applying fail-open default"
                );
                ClassificationResult::fail_open()
            }
        };
        let api_end_ts = now_secs();
        let actual_api_time_ms = (api_end_ts - api_start_ts) * 1000.0;

        let wait_time_ms = self.regulator.hold(service_start);
        let service_end_ts = now_secs();
        let total_service_time_ms = (service_end_ts - service_start_ts) * 1000.0;

        let outcome = self.router.route(
            result.action,
            &record.source_ip,
            record.sequence,
            service_end_ts,
        );
        debug!(
            source_ip = %record.source_ip,
            sequence = record.sequence,
            action = %result.action,
            ?outcome,
            service_ms = total_service_time_ms,
            "message processed"
        );

        // One telemetry record per classified message, independent of the
        // forwarding outcome.
        self.telemetry.record(TelemetryRecord {
            packet_count: record.sequence,
            recv_ts: record.received_at,
            service_start_ts,
            api_start_ts,
            api_end_ts,
            service_end_ts,
            ip: record.source_ip,
            delta: record.delta,
            p_value: result.p_value,
            trust: result.trust,
            action: result.action,
            actual_api_time_ms,
            wait_time_ms,
            total_service_time_ms,
        });
    }
}
