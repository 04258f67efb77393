//! Ordered, de-duplicating accumulator for progress events.
//!
//! A consumer reads the same event twice when it shows up in both a
//! snapshot and an incremental read. [`ProgressLog`] keeps one copy per
//! event id and reports which ids in a batch are new, lowest first, so each
//! event is rendered exactly once and in insertion order.

use std::collections::BTreeMap;

/// Anything carrying a per-job insertion sequence (the event row id).
pub trait Sequenced {
    fn sequence(&self) -> i64;
}

/// Accumulated progress history for one job.
#[derive(Debug, Clone)]
pub struct ProgressLog<T> {
    entries: BTreeMap<i64, T>,
}

impl<T: Sequenced> ProgressLog<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Record a batch, returning the sequences that were new, ascending.
    pub fn accept_all(&mut self, events: impl IntoIterator<Item = T>) -> Vec<i64> {
        let mut fresh: Vec<i64> = events
            .into_iter()
            .filter_map(|e| {
                let seq = e.sequence();
                self.accept(e).then_some(seq)
            })
            .collect();
        fresh.sort_unstable();
        fresh
    }

    pub fn get(&self, sequence: i64) -> Option<&T> {
        self.entries.get(&sequence)
    }

    /// Highest sequence seen so far.
    pub fn last_sequence(&self) -> Option<i64> {
        self.entries.keys().next_back().copied()
    }

    fn accept(&mut self, event: T) -> bool {
        let seq = event.sequence();
        if self.entries.contains_key(&seq) {
            return false;
        }
        self.entries.insert(seq, event);
        true
    }
}

impl<T: Sequenced> Default for ProgressLog<T> {
    fn default() -> Self {
        Self::new()
    }
}
