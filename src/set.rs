//! The consistent set: facade over the store, clock, registry, and commit
//! section.
//!
//! # Thread safety
//!
//! `ConsistentSet` is `Sync`: readers (`lookup`, snapshots, transaction
//! reads) never take the commit lock; commits and compaction serialize
//! through it. The commit lock and the generation clock are the only
//! shared mutable state — read and write sets live inside each
//! transaction.

use std::hash::Hash;
use std::ops::Bound;

use parking_lot::Mutex;

use crate::entry::{Lookup, Payload};
use crate::generation::GenerationClock;
use crate::registry::ReaderRegistry;
use crate::snapshot::Snapshot;
use crate::store::VersionedStore;
use crate::transaction::Transaction;

/// Result of one compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// The floor the pass ran at: the minimum generation any live reader
    /// still references.
    pub floor: u64,
    /// Entries reclaimed.
    pub removed: usize,
}

/// Generic, in-memory, versioned associative container with MVCC.
///
/// Many readers observe consistent point-in-time snapshots while writers
/// stage speculative changes and commit them only if no watched key
/// changed concurrently. Keys need a total order (`Ord`) and hashing for
/// read-set bookkeeping; payloads are opaque clonable values.
pub struct ConsistentSet<K, V> {
    pub(crate) store: VersionedStore<K, V>,
    pub(crate) clock: GenerationClock,
    pub(crate) registry: ReaderRegistry,
    pub(crate) commit_lock: Mutex<()>,
}

impl<K, V> ConsistentSet<K, V>
where
    K: Ord + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create an empty set at generation 0.
    pub fn new() -> Self {
        Self {
            store: VersionedStore::new(),
            clock: GenerationClock::new(),
            registry: ReaderRegistry::new(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Latest committed generation.
    pub fn current_generation(&self) -> u64 {
        self.clock.current()
    }

    /// Open a transaction pinned to the current committed generation.
    pub fn begin_transaction(&self) -> Transaction<'_, K, V> {
        Transaction::begin(self)
    }

    /// Open a read-only snapshot pinned to the current committed
    /// generation.
    pub fn begin_snapshot(&self) -> Snapshot<'_, K, V> {
        Snapshot::pin(self)
    }

    /// Point lookup at the latest committed generation, without pinning a
    /// snapshot.
    pub fn lookup(&self, key: &K) -> Lookup<V> {
        self.store.lookup(key, self.clock.current())
    }

    /// Point lookup at the latest committed generation, folding tombstone
    /// and absence into `None`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lookup(key).into_value()
    }

    /// Upsert a single key outside any transaction: a one-write commit
    /// with no watches. Returns the generation it committed at.
    pub fn put(&self, key: K, value: V) -> u64 {
        self.autocommit(key, Payload::Value(value))
    }

    /// Remove a single key outside any transaction. Returns the generation
    /// the tombstone committed at.
    pub fn remove(&self, key: K) -> u64 {
        self.autocommit(key, Payload::Tombstone)
    }

    /// Delete every key visible at the latest committed generation, as one
    /// commit. Returns the generation the deletions committed at, or the
    /// current generation if there was nothing to delete.
    ///
    /// Live snapshots and transactions keep reading the state they pinned;
    /// the old versions are reclaimed by later maintenance passes.
    pub fn clear(&self) -> u64 {
        let _commit_guard = self.commit_lock.lock();
        let committed = self.clock.current();
        let batch: Vec<(K, Payload<V>)> = self
            .store
            .scan(Bound::Unbounded, Bound::Unbounded, committed)
            .filter(|entry| !entry.payload.is_tombstone())
            .map(|entry| (entry.key, Payload::Tombstone))
            .collect();
        if batch.is_empty() {
            return committed;
        }
        let generation = self.clock.allocate_next();
        let keys = batch.len();
        self.store.publish(generation, batch);
        self.clock.advance_to(generation);
        tracing::debug!(generation, keys, "set cleared");
        generation
    }

    fn autocommit(&self, key: K, payload: Payload<V>) -> u64 {
        let _commit_guard = self.commit_lock.lock();
        let generation = self.clock.allocate_next();
        self.store.publish(generation, [(key, payload)]);
        self.clock.advance_to(generation);
        generation
    }

    /// Run one compaction pass, reclaiming entries no live reader can
    /// observe.
    ///
    /// The floor is the minimum generation across registered transactions
    /// and snapshots (or the current generation when none are live). The
    /// pass shares the commit section, so it can never drop an entry out
    /// from under a publishing commit; reads above the floor proceed
    /// concurrently. Not scheduled internally — call it periodically or
    /// after bursts of commits.
    pub fn maintenance_tick(&self) -> CompactionStats {
        let _commit_guard = self.commit_lock.lock();
        let floor = self.registry.floor(self.clock.current());
        let removed = self.store.remove_entries_older_than(floor);
        tracing::debug!(floor, removed, "compaction pass finished");
        CompactionStats { floor, removed }
    }

    /// Total stored entries, superseded versions included.
    pub fn entry_count(&self) -> usize {
        self.store.len()
    }

    /// Check if the set holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Number of live transactions and snapshots currently registered.
    pub fn active_readers(&self) -> usize {
        self.registry.len()
    }
}

impl<K, V> Default for ConsistentSet<K, V>
where
    K: Ord + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for ConsistentSet<K, V>
where
    K: Ord + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistentSet")
            .field("generation", &self.current_generation())
            .field("entries", &self.entry_count())
            .field("active_readers", &self.active_readers())
            .finish()
    }
}
