//! Policy classification: one synchronous call per message to the external
//! decision service.
//!
//! The call runs on the single processing thread and its latency deliberately
//! throttles the whole pipeline; parallelizing it would break the per-source
//! ordering guarantees. Every failure mode collapses into [`ClassifierError`] and
//! the caller applies the fail-open default instead of rejecting traffic.

use crate::message::{Action, ClassificationResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Decision seam between the processing loop and the policy service.
pub trait Classifier: Send {
    /// Classify one message by its source and inter-arrival delta (seconds).
    fn classify(&self, source_ip: &str, delta: f64) -> Result<ClassificationResult, ClassifierError>;
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Connect failure, timeout, non-2xx status, or unreadable body.
    #[error("policy request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Body did not decode into the expected response shape.
    #[error("policy response malformed: {0}")]
    Malformed(String),
}

#[derive(Serialize)]
struct PolicyRequest<'a> {
    ip: &'a str,
    time_delta: f64,
}

/// Response contract with the decision service. Unknown fields (for example the
/// service's advisory `high_threshold`) are ignored.
#[derive(Deserialize)]
struct PolicyResponse {
    action: String,
    trust: f64,
    p_value: f64,
}

/// HTTP client for the policy decision service.
///
/// Protocol: `POST {url}` with body `{"ip": string, "time_delta": number}`,
/// response `{"action": string, "trust": number, "p_value": number}`, hard
/// request timeout of two seconds by default.
pub struct HttpPolicyClassifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpPolicyClassifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url })
    }
}

impl Classifier for HttpPolicyClassifier {
    fn classify(&self, source_ip: &str, delta: f64) -> Result<ClassificationResult, ClassifierError> {
        let request = PolicyRequest {
            ip: source_ip,
            time_delta: delta,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()?
            .error_for_status()?;
        let body = response.text()?;
        let decision: PolicyResponse =
            serde_json::from_str(&body).map_err(|e| ClassifierError::Malformed(e.to_string()))?;

        // An unknown label is not an error: the service answered, we just do not
        // recognize the verdict, so the message is forwarded at low priority.
        let action = Action::parse(&decision.action).unwrap_or_else(|| {
            warn!(
                source_ip,
                action = %decision.action,
                "unrecognized policy action, defaulting to low priority"
            );
            Action::Low
        });

        Ok(ClassificationResult {
            action,
            trust: decision.trust,
            p_value: decision.p_value,
        })
    }
}
