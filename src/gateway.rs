//! Gateway wiring: owns the stages, the shared running flag, and the ingestion hook.

use crate::classifier::{Classifier, HttpPolicyClassifier};
use crate::error::{ForwardError, GatewayError};
use crate::forwarder::{ForwarderConfig, ForwarderCounters, ForwarderLoop, MqttPublisher, Publisher};
use crate::message::{epoch_secs, IngressRecord};
use crate::priority::{Priority, PriorityTable};
use crate::rate_tracker::RateTracker;
use crate::receive_queue::ReceiveQueue;
use crate::regulator::ServiceTimeRegulator;
use crate::router::PriorityRouter;
use crate::processor::MessageProcessor;
use crate::telemetry::TelemetryWriter;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tracing::{error, info, trace};

/// Top-level gateway configuration used during startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Policy decision service endpoint.
    pub policy_url: String,
    /// Hard timeout on one policy call.
    pub classify_timeout: Duration,
    /// Minimum per-message service time; zero disables the regulator.
    pub service_floor: Duration,
    /// Capacity of each priority channel between processing and forwarding.
    pub channel_capacity: PriorityTable<usize>,
    /// Upstream broker host.
    pub broker_host: String,
    /// Upstream broker port.
    pub broker_port: u16,
    /// MQTT client identifier for the upstream connection.
    pub client_id: String,
    /// Topic all forwarded messages are published to.
    pub topic: String,
    /// Identity stamped into forwarded payloads as `forwarder_ip`.
    pub forwarder_ip: String,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Upper bound on one reconnect wait after a failed publish.
    pub reconnect_timeout: Duration,
    /// Consecutive publish failures at which the circuit breaker trips.
    pub failure_threshold: u32,
    /// Telemetry log path; truncated at startup.
    pub telemetry_path: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            policy_url: "http://127.0.0.1:5000/policy".to_string(),
            classify_timeout: Duration::from_secs(2),
            service_floor: Duration::ZERO,
            channel_capacity: PriorityTable::from_fn(|_| 1024),
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1884,
            client_id: "edge-priority-forwarder".to_string(),
            topic: "forwarded/data".to_string(),
            forwarder_ip: "127.0.0.1".to_string(),
            keep_alive: Duration::from_secs(20),
            reconnect_timeout: Duration::from_secs(10),
            failure_threshold: 100,
            telemetry_path: PathBuf::from("edge_gateway.csv"),
        }
    }
}

/// The assembled pipeline: rate tracker, receive queue, processing and forwarding
/// threads, telemetry writer.
///
/// Construction resets the telemetry log but starts nothing; [`Gateway::start`]
/// spawns the stage threads and [`Gateway::shutdown`] drains them cooperatively.
/// The ingestion hook [`Gateway::ingest`] may be called from any number of threads
/// as soon as the gateway exists.
pub struct Gateway {
    config: GatewayConfig,
    tracker: Arc<RateTracker>,
    queue: Arc<ReceiveQueue>,
    telemetry: Mutex<Option<TelemetryWriter>>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Mutex<Option<ForwarderCounters>>,
    fault: Arc<Mutex<Option<ForwardError>>>,
}

impl Gateway {
    /// Build the gateway and reset the telemetry log. No threads are spawned yet.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let telemetry = TelemetryWriter::create(&config.telemetry_path)?;
        Ok(Self {
            config,
            tracker: Arc::new(RateTracker::new()),
            queue: Arc::new(ReceiveQueue::new()),
            telemetry: Mutex::new(Some(telemetry)),
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
            counters: Mutex::new(None),
            fault: Arc::new(Mutex::new(None)),
        })
    }

    /// The ingestion hook: invoked synchronously once per inbound message.
    ///
    /// Performs exactly one rate-tracker critical section and one queue append; no
    /// network or disk I/O happens here and no downstream failure is ever surfaced
    /// back to the caller.
    pub fn ingest(&self, source_ip: &str, payload: &[u8], arrival: SystemTime) {
        let received_at = epoch_secs(arrival);
        let (sequence, delta) = self.tracker.observe(source_ip, received_at);
        trace!(
            source_ip,
            sequence,
            payload_len = payload.len(),
            "message admitted to receive queue"
        );
        self.queue.push(IngressRecord {
            source_ip: source_ip.to_string(),
            sequence,
            received_at,
            delta,
        });
    }

    /// Connect the real policy classifier and MQTT publisher, then spawn the stages.
    pub fn start(&self) -> Result<(), GatewayError> {
        let classifier = HttpPolicyClassifier::new(
            self.config.policy_url.clone(),
            self.config.classify_timeout,
        )?;
        let publisher = MqttPublisher::connect(
            &self.config.client_id,
            &self.config.broker_host,
            self.config.broker_port,
            self.config.keep_alive,
        );
        self.start_with(Box::new(classifier), Box::new(publisher))
    }

    /// Spawn the processing and forwarding threads over the supplied collaborators.
    pub fn start_with(
        &self,
        classifier: Box<dyn Classifier + Send>,
        publisher: Box<dyn Publisher + Send>,
    ) -> Result<(), GatewayError> {
        self.running.store(true, Ordering::Relaxed);

        let (channel_txs, channel_rxs) = build_priority_channels(&self.config.channel_capacity);
        let router = PriorityRouter::new(channel_txs);
        let telemetry_sender = self
            .telemetry
            .lock()
            .as_ref()
            .expect("telemetry writer must be present before start")
            .sender();

        let processor = MessageProcessor::new(
            self.queue.clone(),
            classifier,
            ServiceTimeRegulator::new(self.config.service_floor),
            router,
            telemetry_sender,
        );
        let running_processor = self.running.clone();
        let processor_handle = std::thread::Builder::new()
            .name("policy-processor".to_string())
            .spawn(move || processor.run(running_processor))?;

        let mut forwarder = ForwarderLoop::new(
            channel_rxs,
            publisher,
            ForwarderConfig {
                topic: self.config.topic.clone(),
                forwarder_ip: self.config.forwarder_ip.clone(),
                failure_threshold: self.config.failure_threshold,
                reconnect_timeout: self.config.reconnect_timeout,
            },
        );
        *self.counters.lock() = Some(forwarder.counters());
        let running_forwarder = self.running.clone();
        let fault = self.fault.clone();
        let forwarder_handle = std::thread::Builder::new()
            .name("priority-forwarder".to_string())
            .spawn(move || {
                if let Err(e) = forwarder.run(running_forwarder.clone()) {
                    error!(error = %e, "forwarder stopped fatally");
                    *fault.lock() = Some(e);
                    // Fail-stop: take the whole gateway down with the forwarder.
                    running_forwarder.store(false, Ordering::Relaxed);
                }
            })?;

        let mut handles = self.handles.lock();
        handles.push(processor_handle);
        handles.push(forwarder_handle);
        info!(
            policy_url = %self.config.policy_url,
            broker = %format!("{}:{}", self.config.broker_host, self.config.broker_port),
            topic = %self.config.topic,
            "gateway stages started"
        );
        Ok(())
    }

    /// Whether the pipeline is still live (false after shutdown or a fatal fault).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Fatal forwarder fault, if one stopped the pipeline.
    pub fn fault(&self) -> Option<ForwardError> {
        *self.fault.lock()
    }

    /// Messages handed to the upstream transport so far, per priority.
    pub fn forwarded_counts(&self) -> PriorityTable<u64> {
        match self.counters.lock().as_ref() {
            Some(counters) => counters.forwarded(),
            None => PriorityTable::from_fn(|_| 0),
        }
    }

    /// Distinct sources observed since startup.
    pub fn tracked_sources(&self) -> usize {
        self.tracker.tracked_sources()
    }

    /// Cooperative shutdown: clear the running flag, join the stage threads, and
    /// drain the telemetry queue. Returns the number of telemetry records written.
    pub fn shutdown(&self) -> u64 {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
        let written = match self.telemetry.lock().take() {
            Some(writer) => writer.close(),
            None => 0,
        };
        let forwarded = self.forwarded_counts();
        info!(
            telemetry_records = written,
            forwarded_high = forwarded[Priority::High],
            forwarded_low = forwarded[Priority::Low],
            sources = self.tracked_sources(),
            "gateway stopped"
        );
        written
    }
}

/// Create bounded crossbeam channels for each priority class using the supplied
/// capacities.
fn build_priority_channels(
    capacities: &PriorityTable<usize>,
) -> (PriorityTable<Sender<String>>, PriorityTable<Receiver<String>>) {
    let mut senders = Vec::new();
    let mut receivers = Vec::new();
    for priority in Priority::ALL {
        let (tx, rx) = crossbeam_channel::bounded(capacities[priority]);
        senders.push(tx);
        receivers.push(rx);
    }
    (
        PriorityTable::from_vec(senders),
        PriorityTable::from_vec(receivers),
    )
}
