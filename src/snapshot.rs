//! Read-only snapshots.
//!
//! A snapshot is a fixed point-in-time view: every read observes the store
//! exactly as it was when the snapshot's generation was published,
//! regardless of commits that land afterwards. Snapshots hold a registry
//! pin for their lifetime, bounding the compaction floor.

use std::ops::RangeBounds;

use crate::entry::{Entry, Lookup};
use crate::registry::ReaderPin;
use crate::set::ConsistentSet;
use crate::store::clone_bounds;

/// Read-only view of a [`ConsistentSet`] pinned to one generation.
///
/// Created by [`ConsistentSet::begin_snapshot`]. Dropping the snapshot
/// releases its registration and lets compaction advance past it.
pub struct Snapshot<'a, K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    set: &'a ConsistentSet<K, V>,
    _pin: ReaderPin<'a>,
    generation: u64,
}

impl<'a, K, V> Snapshot<'a, K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub(crate) fn pin(set: &'a ConsistentSet<K, V>) -> Self {
        let generation = set.clock.current();
        Self {
            set,
            _pin: set.registry.pin(generation),
            generation,
        }
    }

    /// The generation this snapshot observes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Point lookup at the snapshot generation, distinguishing live
    /// values, tombstones, and absence.
    pub fn lookup(&self, key: &K) -> Lookup<V> {
        self.set.store.lookup(key, self.generation)
    }

    /// Point lookup folding tombstone and absence into `None`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lookup(key).into_value()
    }

    /// Ordered scan of live values in `range` at the snapshot generation.
    /// Deleted keys are skipped.
    pub fn scan<R>(&self, range: R) -> impl Iterator<Item = (K, V)> + '_
    where
        R: RangeBounds<K>,
    {
        self.scan_entries(range)
            .filter_map(|entry| entry.payload.into_value().map(|v| (entry.key, v)))
    }

    /// Ordered scan of full entries in `range`, tombstones included. Each
    /// entry carries the generation of the version visible here.
    pub fn scan_entries<R>(&self, range: R) -> impl Iterator<Item = Entry<K, V>> + '_
    where
        R: RangeBounds<K>,
    {
        let (lower, upper) = clone_bounds(&range);
        self.set.store.scan(lower, upper, self.generation)
    }
}
