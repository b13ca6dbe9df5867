//! The single serialization point for the live aggregate.
//!
//! Every mutation and every snapshot runs under one lock, so a reader can never
//! observe an event that has been only partially folded in.

use crate::collector::types::{KeyEvent, KeyId, DELETE_KEY_ID};
use crate::core::stats::AggregateStats;
use chrono::{DateTime, TimeZone};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct AggregatorState {
    stats: AggregateStats,
    revision: u64,
    sealed: bool,
}

/// Owns the in-memory [`AggregateStats`] while the process is alive.
#[derive(Debug)]
pub struct StatAggregator {
    state: Mutex<AggregatorState>,
    delete_key: KeyId,
}

/// Thread-safe shared aggregator.
pub type SharedAggregator = Arc<StatAggregator>;

impl StatAggregator {
    /// Create an empty aggregator using the default delete key.
    pub fn new() -> Self {
        Self::with_delete_key(DELETE_KEY_ID)
    }

    /// Create an empty aggregator that treats `delete_key` as the delete key.
    pub fn with_delete_key(delete_key: KeyId) -> Self {
        Self {
            state: Mutex::new(AggregatorState::default()),
            delete_key,
        }
    }

    /// The key counted as "delete".
    pub fn delete_key(&self) -> KeyId {
        self.delete_key
    }

    /// Record one key-down.
    pub fn record<Tz: TimeZone>(&self, key_id: KeyId, occurred_at: DateTime<Tz>) {
        let is_delete = key_id == self.delete_key;
        let mut state = self.state.lock();
        state.stats.fold(key_id, &occurred_at, is_delete);
        state.revision += 1;
        state.sealed = true;
    }

    /// Record a captured event.
    pub fn record_event(&self, event: &KeyEvent) {
        self.record(event.key_id, event.occurred_at);
    }

    /// Record a batch of events under a single lock acquisition.
    pub fn record_batch(&self, events: &[KeyEvent]) {
        if events.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        for event in events {
            let is_delete = event.key_id == self.delete_key;
            state.stats.fold(event.key_id, &event.occurred_at, is_delete);
        }
        state.revision += events.len() as u64;
        state.sealed = true;
    }

    /// A consistent copy of the aggregate.
    pub fn snapshot(&self) -> AggregateStats {
        self.state.lock().stats.clone()
    }

    /// A consistent copy together with the revision it was taken at.
    pub fn snapshot_with_revision(&self) -> (AggregateStats, u64) {
        let state = self.state.lock();
        (state.stats.clone(), state.revision)
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Total key-downs recorded so far.
    pub fn total_count(&self) -> u64 {
        self.state.lock().stats.total_count
    }

    /// Reset to the empty aggregate.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.stats = AggregateStats::default();
        state.revision += 1;
    }

    /// Seed state from a persisted snapshot.
    ///
    /// Ignored once capture has begun or anything has been recorded. Returns
    /// whether the snapshot was applied.
    pub fn load(&self, initial: AggregateStats) -> bool {
        let mut state = self.state.lock();
        if state.sealed {
            return false;
        }
        state.stats = initial;
        true
    }

    /// Mark that live capture has started; later `load` calls are ignored.
    pub fn begin_capture(&self) {
        self.state.lock().sealed = true;
    }
}

impl Default for StatAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new shared aggregator.
pub fn create_shared_aggregator(delete_key: KeyId) -> SharedAggregator {
    Arc::new(StatAggregator::with_delete_key(delete_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::thread;

    #[test]
    fn test_record_updates_all_counters() {
        let aggregator = StatAggregator::new();
        aggregator.record(DELETE_KEY_ID, Local::now());
        aggregator.record(4, Local::now());

        let stats = aggregator.snapshot();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.total_delete_count, 1);
        assert_eq!(stats.count_for(DELETE_KEY_ID), 1);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_custom_delete_key() {
        let aggregator = StatAggregator::with_delete_key(117);
        aggregator.record(DELETE_KEY_ID, Local::now());
        aggregator.record(117, Local::now());

        let stats = aggregator.snapshot();
        assert_eq!(stats.total_delete_count, 1);
        assert_eq!(stats.count_for(117), 1);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let aggregator = StatAggregator::new();
        aggregator.record(1, Local::now());
        aggregator.clear();
        let once = aggregator.snapshot();
        aggregator.clear();
        let twice = aggregator.snapshot();

        assert_eq!(once, twice);
        assert!(twice.is_empty());
    }

    #[test]
    fn test_load_ignored_after_capture_begins() {
        let mut seeded = AggregateStats::new();
        seeded.fold(3, &Local::now(), false);

        let aggregator = StatAggregator::new();
        assert!(aggregator.load(seeded.clone()));
        assert_eq!(aggregator.total_count(), 1);

        aggregator.begin_capture();
        let mut other = AggregateStats::new();
        other.fold(3, &Local::now(), false);
        other.fold(3, &Local::now(), false);
        assert!(!aggregator.load(other));
        assert_eq!(aggregator.snapshot(), seeded);
    }

    #[test]
    fn test_load_ignored_after_first_record() {
        let aggregator = StatAggregator::new();
        aggregator.record(1, Local::now());
        assert!(!aggregator.load(AggregateStats::new()));
        assert_eq!(aggregator.total_count(), 1);
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let aggregator = StatAggregator::new();
        assert_eq!(aggregator.revision(), 0);
        aggregator.load(AggregateStats::new());
        assert_eq!(aggregator.revision(), 0);

        aggregator.record(1, Local::now());
        aggregator.record_batch(&[KeyEvent::now(2), KeyEvent::now(3)]);
        assert_eq!(aggregator.revision(), 3);

        aggregator.clear();
        assert_eq!(aggregator.revision(), 4);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let aggregator = Arc::new(StatAggregator::new());
        let threads: Vec<_> = (0..8u16)
            .map(|t| {
                let aggregator = aggregator.clone();
                thread::spawn(move || {
                    for i in 0..1250u16 {
                        aggregator.record(t * 1250 + i, Local::now());
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        let stats = aggregator.snapshot();
        assert_eq!(stats.total_count, 10_000);
        assert_eq!(stats.key_frequency.len(), 10_000);
        assert!(stats.is_consistent());
    }
}
