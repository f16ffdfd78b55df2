// End-to-end pipeline tests: ingestion hook -> processing -> priority channels ->
// forwarder, with scripted policy and transport collaborators.

use edge_gateway::classifier::{Classifier, ClassifierError};
use edge_gateway::forwarder::{PublishError, Publisher};
use edge_gateway::message::{Action, ClassificationResult};
use edge_gateway::priority::Priority;
use edge_gateway::{Gateway, GatewayConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Classifier double that pops verdicts from a fixed script.
struct ScriptedClassifier {
    script: Mutex<Vec<Result<ClassificationResult, ClassifierError>>>,
}

impl ScriptedClassifier {
    fn new(mut script: Vec<Result<ClassificationResult, ClassifierError>>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
        }
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, _ip: &str, _delta: f64) -> Result<ClassificationResult, ClassifierError> {
        self.script
            .lock()
            .pop()
            .unwrap_or(Ok(ClassificationResult::fail_open()))
    }
}

fn verdict(action: Action) -> Result<ClassificationResult, ClassifierError> {
    Ok(ClassificationResult {
        action,
        trust: 0.9,
        p_value: 0.01,
    })
}

/// Publisher double that records every payload it accepts.
struct RecordingPublisher {
    published: Arc<Mutex<Vec<String>>>,
}

impl Publisher for RecordingPublisher {
    fn publish(&mut self, _topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.published
            .lock()
            .push(String::from_utf8_lossy(payload).to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn await_reconnect(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn disconnect(&mut self) {}
}

fn test_config(dir: &tempfile::TempDir) -> GatewayConfig {
    GatewayConfig {
        telemetry_path: dir.path().join("edge_gateway.csv"),
        forwarder_ip: "192.168.100.2".to_string(),
        ..GatewayConfig::default()
    }
}

fn wait_for_publishes(published: &Arc<Mutex<Vec<String>>>, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while published.lock().len() < expected {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {expected} publishes, got {}",
            published.lock().len()
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn high_low_high_scenario_preserves_order_and_priorities() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Gateway::new(test_config(&dir)).unwrap();

    let published = Arc::new(Mutex::new(Vec::new()));
    gateway
        .start_with(
            Box::new(ScriptedClassifier::new(vec![
                verdict(Action::High),
                verdict(Action::Low),
                verdict(Action::High),
            ])),
            Box::new(RecordingPublisher {
                published: published.clone(),
            }),
        )
        .unwrap();

    // Source 10.0.0.5 sends three messages at t = 0, 1, 2 seconds; the pipeline
    // drains each one before the next arrives.
    let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    for i in 0..3u64 {
        gateway.ingest("10.0.0.5", b"sensor reading", t0 + Duration::from_secs(i));
        wait_for_publishes(&published, i as usize + 1);
    }
    let written = gateway.shutdown();
    assert_eq!(written, 3);

    // Publish order is #1 (high), #2 (low), #3 (high).
    let order: Vec<(u64, String)> = published
        .lock()
        .iter()
        .map(|payload| {
            let value: serde_json::Value = serde_json::from_str(payload).unwrap();
            (
                value["count"].as_u64().unwrap(),
                value["priority"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        order,
        [
            (1, "high".to_string()),
            (2, "low".to_string()),
            (3, "high".to_string()),
        ]
    );

    // Every forwarded payload is augmented with the forwarder identity.
    for payload in published.lock().iter() {
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["ip"], "10.0.0.5");
        assert_eq!(value["forwarder_ip"], "192.168.100.2");
        assert!(value["forward_timestamp"].as_f64().is_some());
    }

    let counts = gateway.forwarded_counts();
    assert_eq!(counts[Priority::High], 2);
    assert_eq!(counts[Priority::Low], 1);

    // Telemetry: one row per message, sequence strictly increasing, first delta 0.
    let log = std::fs::read_to_string(dir.path().join("edge_gateway.csv")).unwrap();
    let rows: Vec<&str> = log.lines().skip(1).collect();
    assert_eq!(rows.len(), 3);
    for (i, row) in rows.iter().enumerate() {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[0], (i + 1).to_string());
        assert_eq!(fields[6], "10.0.0.5");
    }
    assert_eq!(rows[0].split(',').nth(7).unwrap(), "0.000000");
    assert_eq!(rows[1].split(',').nth(7).unwrap(), "1.000000");
}

#[test]
fn classifier_failure_fails_open_to_low_and_still_writes_telemetry() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Gateway::new(test_config(&dir)).unwrap();

    let published = Arc::new(Mutex::new(Vec::new()));
    gateway
        .start_with(
            Box::new(ScriptedClassifier::new(vec![Err(
                ClassifierError::Malformed("deadline exceeded".to_string()),
            )])),
            Box::new(RecordingPublisher {
                published: published.clone(),
            }),
        )
        .unwrap();

    gateway.ingest("10.0.0.7", b"late reading", SystemTime::now());
    wait_for_publishes(&published, 1);
    let written = gateway.shutdown();
    assert_eq!(written, 1);

    // The message was routed low, never high and never dropped.
    let value: serde_json::Value = serde_json::from_str(&published.lock()[0]).unwrap();
    assert_eq!(value["priority"], "low");
    assert_eq!(gateway.forwarded_counts()[Priority::High], 0);

    // Telemetry carries the fail-open scores: p_value 0.0, trust 1.0, action low.
    let log = std::fs::read_to_string(dir.path().join("edge_gateway.csv")).unwrap();
    let row = log.lines().nth(1).unwrap();
    let fields: Vec<&str> = row.split(',').collect();
    assert_eq!(fields[8], "0.0000");
    assert_eq!(fields[9], "1.000");
    assert_eq!(fields[10], "low");
}

#[test]
fn drop_verdict_records_telemetry_but_forwards_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Gateway::new(test_config(&dir)).unwrap();

    let published = Arc::new(Mutex::new(Vec::new()));
    gateway
        .start_with(
            Box::new(ScriptedClassifier::new(vec![
                verdict(Action::Drop),
                verdict(Action::Low),
            ])),
            Box::new(RecordingPublisher {
                published: published.clone(),
            }),
        )
        .unwrap();

    let t0 = SystemTime::now();
    gateway.ingest("10.0.0.8", b"first", t0);
    gateway.ingest("10.0.0.8", b"second", t0 + Duration::from_secs(1));

    // Only the second message is forwarded.
    wait_for_publishes(&published, 1);
    std::thread::sleep(Duration::from_millis(100));
    let written = gateway.shutdown();

    assert_eq!(published.lock().len(), 1);
    let value: serde_json::Value = serde_json::from_str(&published.lock()[0]).unwrap();
    assert_eq!(value["count"], 2);

    // Telemetry covers both, including the dropped message.
    assert_eq!(written, 2);
    let log = std::fs::read_to_string(dir.path().join("edge_gateway.csv")).unwrap();
    assert!(log.lines().nth(1).unwrap().contains(",drop,"));
}
