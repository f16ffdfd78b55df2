//! Priority definitions and helpers used across the gateway stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Forwarding priority classes ordered from most to least critical.
///
/// The ordering is stable so stages can rely on integer indexes instead of branching on
/// specific labels, and so the forwarder's alternation loop always visits `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    /// Ordered list of all priorities (high → low) for iteration utilities.
    pub const ALL: [Priority; 2] = [Priority::High, Priority::Low];

    /// Stable index for priority based arrays.
    pub const fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }

    /// Wire label carried inside serialized records (`"high"` / `"low"`).
    pub const fn label(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Helper structure wrapping a value per [`Priority`].
///
/// Keeps APIs stable if a priority class is ever added: as long as [`Priority::ALL`] is
/// updated, the table grows and all call sites iterate dynamically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable<T> {
    values: Vec<T>,
}

impl<T> PriorityTable<T> {
    /// Build a table by executing a closure for each priority in [`Priority::ALL`] order.
    pub fn from_fn(mut f: impl FnMut(Priority) -> T) -> Self {
        let mut values = Vec::with_capacity(Priority::ALL.len());
        for priority in Priority::ALL {
            values.push(f(priority));
        }
        PriorityTable { values }
    }

    /// Borrow the value for a given priority.
    pub fn get(&self, priority: Priority) -> &T {
        &self.values[priority.index()]
    }

    /// Mutably borrow the value for a given priority.
    pub fn get_mut(&mut self, priority: Priority) -> &mut T {
        &mut self.values[priority.index()]
    }

    /// Build a table from a vector ordered according to [`Priority::ALL`].
    ///
    /// # Panics
    /// Panics if `values.len() != Priority::ALL.len()`.
    pub fn from_vec(values: Vec<T>) -> Self {
        assert!(
            values.len() == Priority::ALL.len(),
            "priority table expects {} entries, got {}",
            Priority::ALL.len(),
            values.len()
        );
        PriorityTable { values }
    }
}

impl<T> Index<Priority> for PriorityTable<T> {
    type Output = T;

    fn index(&self, index: Priority) -> &Self::Output {
        self.get(index)
    }
}

impl<T> IndexMut<Priority> for PriorityTable<T> {
    fn index_mut(&mut self, index: Priority) -> &mut Self::Output {
        self.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_index_is_stable() {
        assert_eq!(Priority::High.index(), 0);
        assert_eq!(Priority::Low.index(), 1);
    }

    #[test]
    fn priority_labels_match_wire_format() {
        assert_eq!(Priority::High.label(), "high");
        assert_eq!(Priority::Low.label(), "low");
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        assert_eq!(
            serde_json::from_str::<Priority>("\"low\"").unwrap(),
            Priority::Low
        );
    }

    #[test]
    fn priority_table_builds_and_indexes() {
        let table = PriorityTable::from_fn(|p| p.index());
        assert_eq!(table[Priority::High], 0);
        assert_eq!(table[Priority::Low], 1);
    }
}
