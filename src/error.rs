//! Gateway error types.

use crate::classifier::ClassifierError;
use thiserror::Error;

/// Fatal condition raised by the forwarder stage.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ForwardError {
    /// Sustained publish failure: the process stops instead of retrying forever,
    /// turning silent degradation into an operator-actionable exit.
    #[error("circuit breaker tripped after {failures} consecutive publish failures")]
    CircuitBreaker { failures: u32 },
}

/// Top-level error surfaced by gateway construction, startup, and shutdown.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Forward(#[from] ForwardError),
}
