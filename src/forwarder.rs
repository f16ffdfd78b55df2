//! Drains the priority channels under bounded alternation and republishes to the
//! upstream broker.
//!
//! Alternation discipline: each cycle takes at most one available message from the
//! High channel, then at most one from the Low channel. A high-priority message is
//! therefore never delayed behind more than one low-priority message, and low
//! traffic can never be starved outright. Sustained publish failure trips a circuit
//! breaker that converts silent degradation into a hard, operator-visible stop.

use crate::error::ForwardError;
use crate::message::now_secs;
use crate::priority::{Priority, PriorityTable};
use crossbeam_channel::{select, Receiver, TryRecvError};
use rumqttc::{Client, Event, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// How long the loop blocks waiting for channel data before re-checking the
/// running flag.
const IDLE_RECHECK: Duration = Duration::from_millis(500);

/// Forwarded-message count between periodic statistics lines.
const STATS_INTERVAL: u64 = 50;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("not connected to upstream broker")]
    NotConnected,
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Publish seam between the forwarder loop and the outbound transport.
pub trait Publisher: Send {
    /// Publish one payload at at-least-once quality.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Current liveness of the upstream connection.
    fn is_connected(&self) -> bool;

    /// Block up to `timeout` for the connection to come back. Returns the final
    /// connection state.
    fn await_reconnect(&mut self, timeout: Duration) -> bool;

    /// Close the connection; called once during graceful shutdown.
    fn disconnect(&mut self);
}

/// MQTT publisher over one persistent upstream connection.
///
/// The connection event loop runs on its own driver thread which maintains the
/// shared connectivity flag and retries the transport after errors; the forwarder
/// thread only enqueues publishes and polls that flag.
pub struct MqttPublisher {
    client: Client,
    connected: Arc<AtomicBool>,
    driver_running: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    pub fn connect(client_id: &str, host: &str, port: u16, keep_alive: Duration) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(keep_alive);
        options.set_clean_session(true);

        let (client, mut connection) = Client::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let driver_running = Arc::new(AtomicBool::new(true));

        let driver_connected = connected.clone();
        let driver_flag = driver_running.clone();
        let driver = std::thread::Builder::new()
            .name("mqtt-driver".to_string())
            .spawn(move || {
                for event in connection.iter() {
                    if !driver_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            driver_connected.store(true, Ordering::Relaxed);
                            info!("connected to upstream broker");
                        }
                        Ok(Event::Incoming(Incoming::Disconnect)) => {
                            driver_connected.store(false, Ordering::Relaxed);
                            warn!("upstream broker requested disconnect");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if driver_connected.swap(false, Ordering::Relaxed) {
                                warn!(error = %e, "upstream connection lost, retrying");
                            }
                            // The iterator reconnects on its next poll; pace the retries.
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            })
            .expect("failed to spawn mqtt driver thread");

        Self {
            client,
            connected,
            driver_running,
            driver: Some(driver),
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(PublishError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| PublishError::Rejected(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn await_reconnect(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.connected.load(Ordering::Relaxed) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        self.connected.load(Ordering::Relaxed)
    }

    fn disconnect(&mut self) {
        self.driver_running.store(false, Ordering::Relaxed);
        let _ = self.client.disconnect();
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

/// Shared forwarded-message counters, readable from outside the loop thread.
#[derive(Clone)]
pub struct ForwarderCounters {
    forwarded: PriorityTable<Arc<AtomicU64>>,
}

impl ForwarderCounters {
    fn new() -> Self {
        Self {
            forwarded: PriorityTable::from_fn(|_| Arc::new(AtomicU64::new(0))),
        }
    }

    /// Messages successfully handed to the transport, per priority.
    pub fn forwarded(&self) -> PriorityTable<u64> {
        PriorityTable::from_fn(|priority| self.forwarded[priority].load(Ordering::Relaxed))
    }
}

/// Configuration for one forwarder loop.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Topic every forwarded message is published to.
    pub topic: String,
    /// Identity stamped into each forwarded payload as `forwarder_ip`.
    pub forwarder_ip: String,
    /// Consecutive publish failures at which the circuit breaker trips.
    pub failure_threshold: u32,
    /// Upper bound on one reconnect wait after a failed publish.
    pub reconnect_timeout: Duration,
}

/// The forwarder stage: alternating reader, augmenting republisher, circuit breaker.
pub struct ForwarderLoop {
    receivers: PriorityTable<Receiver<String>>,
    publisher: Box<dyn Publisher + Send>,
    config: ForwarderConfig,
    counters: ForwarderCounters,
    consecutive_failures: u32,
    total_forwarded: u64,
}

impl ForwarderLoop {
    pub fn new(
        receivers: PriorityTable<Receiver<String>>,
        publisher: Box<dyn Publisher + Send>,
        config: ForwarderConfig,
    ) -> Self {
        Self {
            receivers,
            publisher,
            config,
            counters: ForwarderCounters::new(),
            consecutive_failures: 0,
            total_forwarded: 0,
        }
    }

    /// Handle to the forwarded-message counters; may be cloned before `run`.
    pub fn counters(&self) -> ForwarderCounters {
        self.counters.clone()
    }

    /// Drain both channels until shutdown or a tripped circuit breaker.
    ///
    /// On a graceful stop the in-flight publish completes, the connection is closed,
    /// and `Ok(())` is returned. A tripped breaker returns the fatal error without
    /// attempting any further publish.
    pub fn run(&mut self, running: Arc<AtomicBool>) -> Result<(), ForwardError> {
        // Clone receivers once so the hot loop never borrows through `self`.
        let receivers = PriorityTable::from_fn(|priority| self.receivers[priority].clone());
        let high_rx = receivers[Priority::High].clone();
        let low_rx = receivers[Priority::Low].clone();

        let result = loop {
            if !running.load(Ordering::Relaxed) {
                break Ok(());
            }

            let mut handled = false;
            let mut disconnected = 0;
            // One message from High, then one from Low: bounded alternation.
            for priority in Priority::ALL {
                match receivers[priority].try_recv() {
                    Ok(line) => {
                        handled = true;
                        if self.forward(&line, priority).is_err() {
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => disconnected += 1,
                }
            }
            if self.consecutive_failures >= self.config.failure_threshold {
                break Err(ForwardError::CircuitBreaker {
                    failures: self.consecutive_failures,
                });
            }
            if disconnected == Priority::ALL.len() {
                // Both senders gone: the processing stage has shut down.
                break Ok(());
            }

            if !handled {
                // Idle: block until either channel has data, bounded so the running
                // flag is still observed periodically. Alternation is unaffected
                // because only one side can have traffic here.
                select! {
                    recv(high_rx) -> line => {
                        if let Ok(line) = line {
                            if self.forward(&line, Priority::High).is_err() {
                                break Err(ForwardError::CircuitBreaker {
                                    failures: self.consecutive_failures,
                                });
                            }
                        }
                    }
                    recv(low_rx) -> line => {
                        if let Ok(line) = line {
                            if self.forward(&line, Priority::Low).is_err() {
                                break Err(ForwardError::CircuitBreaker {
                                    failures: self.consecutive_failures,
                                });
                            }
                        }
                    }
                    default(IDLE_RECHECK) => {}
                }
                if self.consecutive_failures >= self.config.failure_threshold {
                    break Err(ForwardError::CircuitBreaker {
                        failures: self.consecutive_failures,
                    });
                }
            }
        };

        self.publisher.disconnect();
        result
    }

    /// Forward one framed record: parse, augment, publish, account.
    ///
    /// Returns `Err` only when the circuit breaker trips.
    fn forward(&mut self, line: &str, priority: Priority) -> Result<(), ForwardError> {
        let payload = self.augment(line);

        match self.publisher.publish(&self.config.topic, payload.as_bytes()) {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.counters.forwarded[priority].fetch_add(1, Ordering::Relaxed);
                self.total_forwarded += 1;
                if self.total_forwarded % STATS_INTERVAL == 0 {
                    let counts = self.counters.forwarded();
                    info!(
                        total = self.total_forwarded,
                        high = counts[Priority::High],
                        low = counts[Priority::Low],
                        "forwarding statistics"
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    %priority,
                    consecutive_failures = self.consecutive_failures,
                    error = %e,
                    "publish failed"
                );
                if self.consecutive_failures >= self.config.failure_threshold {
                    error!(
                        failures = self.consecutive_failures,
                        "circuit breaker tripped, stopping forwarder"
                    );
                    return Err(ForwardError::CircuitBreaker {
                        failures: self.consecutive_failures,
                    });
                }
                if !self.publisher.is_connected()
                    && !self.publisher.await_reconnect(self.config.reconnect_timeout)
                {
                    warn!(
                        timeout_secs = self.config.reconnect_timeout.as_secs(),
                        "upstream still down after reconnect window"
                    );
                }
                Ok(())
            }
        }
    }

    /// Stamp forwarder identity and forward time into the record.
    ///
    /// A record that does not parse as a JSON object is forwarded unmodified, with
    /// a warning; losing it would violate at-least-once handoff for a purely local
    /// formatting problem.
    fn augment(&self, line: &str) -> String {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(mut fields)) => {
                fields.insert(
                    "forwarder_ip".to_string(),
                    serde_json::Value::String(self.config.forwarder_ip.clone()),
                );
                fields.insert(
                    "forward_timestamp".to_string(),
                    serde_json::json!(now_secs()),
                );
                serde_json::Value::Object(fields).to_string()
            }
            _ => {
                warn!("non-JSON record on priority channel, forwarding raw");
                line.trim_end().to_string()
            }
        }
    }
}
