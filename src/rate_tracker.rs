//! Per-source arrival tracking: sequence numbers and inter-arrival deltas.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Mutable per-source state, updated in place on every observation.
#[derive(Debug)]
struct SourceState {
    /// Arrival time of the most recent message, epoch seconds.
    last_seen: f64,
    /// Number of messages observed from this source so far.
    sequence: u64,
}

/// Tracks last-seen time and a sequence counter for every source address.
///
/// The map is guarded by a single mutex and each observation is one O(1) critical
/// section. Entries are never evicted: memory grows with the number of distinct
/// sources, which is an accepted limitation of the current design rather than a bug
/// to patch here.
#[derive(Debug, Default)]
pub struct RateTracker {
    sources: Mutex<HashMap<String, SourceState>>,
}

impl RateTracker {
    pub fn new() -> Self {
        RateTracker {
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Record one arrival from `source_ip` at time `now` (epoch seconds).
    ///
    /// Returns `(sequence, delta)`: the per-source sequence number (starting at 1)
    /// and the gap to the previous arrival in seconds. The first observation for a
    /// source yields a delta of exactly zero. A delta may come out negative when the
    /// caller's clock steps backwards; it is reported as-is, not corrected.
    pub fn observe(&self, source_ip: &str, now: f64) -> (u64, f64) {
        let mut sources = self.sources.lock();
        match sources.get_mut(source_ip) {
            Some(state) => {
                let delta = now - state.last_seen;
                state.last_seen = now;
                state.sequence += 1;
                (state.sequence, delta)
            }
            None => {
                sources.insert(
                    source_ip.to_string(),
                    SourceState {
                        last_seen: now,
                        sequence: 1,
                    },
                );
                (1, 0.0)
            }
        }
    }

    /// Number of distinct sources observed since startup.
    pub fn tracked_sources(&self) -> usize {
        self.sources.lock().len()
    }
}
