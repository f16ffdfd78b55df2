//! Message representations shared by all gateway stages.
//!
//! An [`IngressRecord`] is produced once per inbound message by the ingestion hook and
//! consumed exactly once by the processing thread. A [`PriorityMessage`] is the framed
//! unit crossing the boundary between the processing stage and the forwarder: one
//! newline-terminated JSON object per record.

use crate::priority::Priority;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Convert a wall-clock instant to fractional seconds since the Unix epoch.
///
/// All timestamps on the wire and in the telemetry log use this representation.
pub fn epoch_secs(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        // Pre-epoch clocks only occur under severe skew; represent them as negative.
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Current wall-clock time as fractional epoch seconds.
pub fn now_secs() -> f64 {
    epoch_secs(SystemTime::now())
}

/// Immutable snapshot of one inbound message, queued for the processing thread.
#[derive(Debug, Clone, PartialEq)]
pub struct IngressRecord {
    /// Source address the broker observed for the publishing client.
    pub source_ip: String,
    /// Per-source sequence number assigned by the rate tracker (starts at 1).
    pub sequence: u64,
    /// Arrival time at the ingestion hook, epoch seconds.
    pub received_at: f64,
    /// Inter-arrival gap to the previous message from the same source, seconds.
    /// Zero for the first message; may be negative under clock skew.
    pub delta: f64,
}

/// Verdict issued by the policy service for a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Drop,
    High,
    Low,
}

impl Action {
    /// Parse a wire label. Unrecognized labels yield `None`; callers treat that as
    /// `Low` so a misbehaving policy service can never block traffic.
    pub fn parse(label: &str) -> Option<Action> {
        match label {
            "drop" => Some(Action::Drop),
            "high" => Some(Action::High),
            "low" => Some(Action::Low),
            _ => None,
        }
    }

    /// Outbound priority class for this action, or `None` when the message is dropped.
    pub const fn priority(self) -> Option<Priority> {
        match self {
            Action::Drop => None,
            Action::High => Some(Priority::High),
            Action::Low => Some(Priority::Low),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Drop => "drop",
            Action::High => "high",
            Action::Low => "low",
        };
        f.write_str(label)
    }
}

/// Full classification verdict: the action plus the scores backing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub action: Action,
    pub trust: f64,
    pub p_value: f64,
}

impl ClassificationResult {
    /// Deterministic default applied whenever the policy service cannot be consulted:
    /// forward at low priority rather than reject.
    pub const fn fail_open() -> Self {
        ClassificationResult {
            action: Action::Low,
            trust: 1.0,
            p_value: 0.0,
        }
    }
}

/// Serialized unit crossing the processing → forwarder boundary.
///
/// Field names match the channel wire protocol:
/// `{"ip": …, "count": …, "timestamp": …, "priority": "high"|"low"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityMessage {
    pub ip: String,
    pub count: u64,
    pub timestamp: f64,
    pub priority: Priority,
}

impl PriorityMessage {
    /// Frame the message as one newline-terminated JSON record.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse a record framed by [`PriorityMessage::to_line`]. Trailing newline optional.
    pub fn from_line(line: &str) -> Result<PriorityMessage, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_labels_round_trip() {
        for action in [Action::Drop, Action::High, Action::Low] {
            assert_eq!(Action::parse(&action.to_string()), Some(action));
        }
        assert_eq!(Action::parse("quarantine"), None);
    }

    #[test]
    fn action_maps_to_priority() {
        assert_eq!(Action::Drop.priority(), None);
        assert_eq!(Action::High.priority(), Some(Priority::High));
        assert_eq!(Action::Low.priority(), Some(Priority::Low));
    }

    #[test]
    fn fail_open_defaults_to_low_priority() {
        let fallback = ClassificationResult::fail_open();
        assert_eq!(fallback.action, Action::Low);
        assert_eq!(fallback.trust, 1.0);
        assert_eq!(fallback.p_value, 0.0);
    }

    #[test]
    fn priority_message_line_round_trip() {
        let msg = PriorityMessage {
            ip: "10.0.0.5".to_string(),
            count: 42,
            timestamp: 1_700_000_000.25,
            priority: Priority::High,
        };
        let line = msg.to_line().unwrap();
        assert!(line.ends_with('\n'));
        let parsed = PriorityMessage::from_line(&line).unwrap();
        assert_eq!(parsed.ip, msg.ip);
        assert_eq!(parsed.count, msg.count);
        assert_eq!(parsed.priority, msg.priority);
    }

    #[test]
    fn priority_message_ignores_unknown_fields() {
        let line = r#"{"ip":"10.0.0.1","count":7,"timestamp":12.5,"priority":"low","extra":true}"#;
        let parsed = PriorityMessage::from_line(line).unwrap();
        assert_eq!(parsed.count, 7);
        assert_eq!(parsed.priority, Priority::Low);
    }

    #[test]
    fn epoch_secs_is_monotone_for_ordered_instants() {
        let earlier = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(100);
        let later = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(101);
        assert!(epoch_secs(later) > epoch_secs(earlier));
        assert_eq!(epoch_secs(earlier), 100.0);
    }
}
