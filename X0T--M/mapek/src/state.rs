//! Per-cycle records and the bounded in-memory history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{directive::OperationalDirective, metrics::ConsciousnessMetrics};

/// Default number of cycles retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Snapshot of one completed cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapekState {
    /// Analyze output.
    pub metrics: ConsciousnessMetrics,
    /// Plan output after overrides.
    pub directives: OperationalDirective,
    /// Execute outcomes in the order they happened.
    pub actions_taken: Vec<String>,
    /// Time the record was created.
    pub timestamp: DateTime<Utc>,
}

impl MapekState {
    /// Stamps a new record with the current time.
    #[must_use]
    pub fn new(
        metrics: ConsciousnessMetrics,
        directives: OperationalDirective,
        actions_taken: Vec<String>,
    ) -> Self {
        Self {
            metrics,
            directives,
            actions_taken,
            timestamp: Utc::now(),
        }
    }
}

/// Ring buffer of cycle records; oldest dropped first.
#[derive(Debug, Clone)]
pub struct StateHistory {
    entries: VecDeque<MapekState>,
    capacity: usize,
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl StateHistory {
    /// Creates an empty history; capacity is at least one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends a record, evicting the oldest when full.
    pub fn push(&mut self, state: MapekState) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(state);
    }

    /// Most recent record.
    #[must_use]
    pub fn latest(&self) -> Option<&MapekState> {
        self.entries.back()
    }

    /// Records retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before the first cycle completes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum records retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl Iterator<Item = &MapekState> {
        self.entries.iter()
    }

    /// Owned copy, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<MapekState> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ConsciousnessState, RawMetrics};

    fn record(tag: &str) -> MapekState {
        let metrics = ConsciousnessMetrics {
            phi_ratio: 1.2,
            state: ConsciousnessState::Harmonic,
            frequency_alignment: 0.9,
            entropy: 0.5,
            harmony_index: 0.8,
            mesh_health: 0.9,
            timestamp: Utc::now(),
            raw_metrics: RawMetrics::new(),
        };
        let directive = OperationalDirective::new(ConsciousnessState::Harmonic);
        MapekState::new(metrics, directive, vec![tag.to_owned()])
    }

    #[test]
    fn evicts_oldest_first() {
        let mut history = StateHistory::new(3);
        for tag in ["a", "b", "c", "d"] {
            history.push(record(tag));
        }
        assert_eq!(history.len(), 3);
        let tags: Vec<_> = history.iter().map(|s| s.actions_taken[0].clone()).collect();
        assert_eq!(tags, vec!["b", "c", "d"]);
        assert_eq!(history.latest().unwrap().actions_taken[0], "d");
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut history = StateHistory::new(0);
        history.push(record("a"));
        history.push(record("b"));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.to_vec().len(), 1);
    }
}
