// Gateway binary: wires a UDP intake to the pipeline and runs until Ctrl+C.
//
// The intake is deliberately thin: each datagram's peer address is the source IP
// and its bytes the payload, handed straight to the ingestion hook. Any other
// interception mechanism (a broker plugin, a socket activation shim) can call the
// same hook.

use edge_gateway::{Gateway, GatewayConfig};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line options parsed from program arguments.
struct CliOptions {
    /// Policy decision service endpoint.
    policy_url: String,
    /// Upstream broker as `host:port`.
    broker: String,
    /// Topic forwarded messages are published to.
    topic: String,
    /// MQTT client identifier.
    client_id: String,
    /// Identity stamped into forwarded payloads.
    forwarder_ip: String,
    /// UDP bind address for the intake.
    listen: String,
    /// Minimum per-message service time in milliseconds (0 disables).
    service_floor_ms: u64,
    /// Consecutive publish failures at which the process stops.
    failure_threshold: u32,
    /// Telemetry log path.
    telemetry_log: String,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            policy_url: "http://127.0.0.1:5000/policy".to_string(),
            broker: "127.0.0.1:1884".to_string(),
            topic: "forwarded/data".to_string(),
            client_id: "edge-priority-forwarder".to_string(),
            forwarder_ip: "127.0.0.1".to_string(),
            listen: "127.0.0.1:1883".to_string(),
            service_floor_ms: 0,
            failure_threshold: 100,
            telemetry_log: "edge_gateway.csv".to_string(),
        }
    }
}

/// Parse command-line arguments, accepting both `--key=value` and `--key value`.
fn parse_cli_options() -> CliOptions {
    let mut options = CliOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (arg.clone(), args.next()),
        };
        let Some(value) = value else { continue };
        match key.as_str() {
            "--policy-url" => options.policy_url = value,
            "--broker" => options.broker = value,
            "--topic" => options.topic = value,
            "--client-id" => options.client_id = value,
            "--forwarder-ip" => options.forwarder_ip = value,
            "--listen" => options.listen = value,
            "--service-floor-ms" => {
                options.service_floor_ms = value.parse().unwrap_or(options.service_floor_ms);
            }
            "--failure-threshold" => {
                options.failure_threshold = value.parse().unwrap_or(options.failure_threshold);
            }
            "--telemetry-log" => options.telemetry_log = value,
            _ => {}
        }
    }
    options
}

fn gateway_config(options: &CliOptions) -> GatewayConfig {
    let (broker_host, broker_port) = match options.broker.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(1884)),
        None => (options.broker.clone(), 1884),
    };
    GatewayConfig {
        policy_url: options.policy_url.clone(),
        service_floor: Duration::from_millis(options.service_floor_ms),
        broker_host,
        broker_port,
        client_id: options.client_id.clone(),
        topic: options.topic.clone(),
        forwarder_ip: options.forwarder_ip.clone(),
        failure_threshold: options.failure_threshold,
        telemetry_path: options.telemetry_log.clone().into(),
        ..GatewayConfig::default()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = parse_cli_options();
    let gateway = Arc::new(Gateway::new(gateway_config(&options))?);
    gateway.start()?;

    // UDP intake: one thread feeding the ingestion hook.
    let socket = UdpSocket::bind(&options.listen)?;
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    info!(listen = %options.listen, "udp intake listening");

    let intake_gateway = gateway.clone();
    let intake_running = Arc::new(AtomicBool::new(true));
    let intake_flag = intake_running.clone();
    let intake = std::thread::Builder::new()
        .name("udp-intake".to_string())
        .spawn(move || {
            let mut buf = [0u8; 64 * 1024];
            while intake_flag.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((len, peer)) => {
                        intake_gateway.ingest(
                            &peer.ip().to_string(),
                            &buf[..len],
                            SystemTime::now(),
                        );
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "udp intake receive failed");
                    }
                }
            }
        })?;

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown_requested.clone();
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::Relaxed);
    })?;

    // Wait for Ctrl+C or a fatal pipeline fault (circuit breaker).
    while !shutdown_requested.load(Ordering::Relaxed) && gateway.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    intake_running.store(false, Ordering::Relaxed);
    let _ = intake.join();
    gateway.shutdown();

    if let Some(fault) = gateway.fault() {
        return Err(fault.into());
    }
    Ok(())
}
