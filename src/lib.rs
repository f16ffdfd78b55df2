//! Edge-side MQTT admission-control and priority-forwarding gateway.
//!
//! Inbound messages enter through the [`Gateway::ingest`] hook, flow through
//! per-source rate tracking, a single policy-classification thread, and a
//! two-level priority boundary, and are republished upstream by a reconnecting
//! forwarder with a failure circuit breaker. Per-message timing telemetry is
//! written off the hot path by a dedicated thread.

pub mod classifier;
pub mod error;
pub mod forwarder;
pub mod gateway;
pub mod message;
pub mod priority;
pub mod processor;
pub mod rate_tracker;
pub mod receive_queue;
pub mod regulator;
pub mod router;
pub mod telemetry;

// Re-export for easier embedding and testing
pub use gateway::{Gateway, GatewayConfig};
pub use priority::{Priority, PriorityTable};
