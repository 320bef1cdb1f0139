//! Transactions: client-local staging plus the commit protocol.
//!
//! A transaction is associated with a snapshot generation fixed at `begin`.
//! Reads are lock-free against the store; writes stage locally and publish
//! only at commit. Validation is read-set based: a watched key whose
//! visible generation changed since it was observed fails the commit with
//! [`Error::Conflict`]. Keys written but never watched commit
//! unconditionally (blind writes, last-committer-wins).
//!
//! The commit sequence mirrors the classic OCC shape:
//!
//! 1. Acquire the commit section (serializes commits only, never reads).
//! 2. Re-check every watched key against the latest committed generation.
//! 3. On success, allocate a fresh generation, publish the write set as
//!    one batch, then advance the committed watermark.
//!
//! The lock prevents the TOCTOU race where validation passes but another
//! commit lands between validation and publication.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::iter::Peekable;
use std::ops::RangeBounds;

use rustc_hash::FxHashMap;

use crate::entry::{Lookup, Payload};
use crate::error::{Error, Result};
use crate::registry::ReaderPin;
use crate::set::ConsistentSet;
use crate::store::{clone_bounds, Scan};

/// Lifecycle state of a transaction. `Committed` and `Aborted` are
/// terminal; any further operation fails with `InvalidState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Accepting watches and staged writes.
    Staged,
    /// Terminal: the write set was published.
    Committed,
    /// Terminal: the write set was discarded.
    Aborted,
}

/// What a watch observed: the generation of the visible version (0 when
/// the key was absent) and whether that version was a tombstone. The flag
/// lets commit validation accept a watched terminal tombstone that
/// compaction has since reclaimed — the key still reads as deleted, so
/// nothing the transaction depends on changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watched {
    generation: u64,
    tombstone: bool,
}

/// An optimistic transaction against a [`ConsistentSet`].
///
/// Created by [`ConsistentSet::begin_transaction`]. Dropping a transaction
/// without terminating it behaves like an abort: nothing is published and
/// its registry pin is released.
pub struct Transaction<'a, K, V>
where
    K: Ord + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    set: &'a ConsistentSet<K, V>,
    snapshot_generation: u64,
    read_set: FxHashMap<K, Watched>,
    write_set: BTreeMap<K, Payload<V>>,
    status: Status,
    pin: Option<ReaderPin<'a>>,
}

impl<'a, K, V> Transaction<'a, K, V>
where
    K: Ord + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub(crate) fn begin(set: &'a ConsistentSet<K, V>) -> Self {
        let snapshot_generation = set.clock.current();
        let pin = set.registry.pin(snapshot_generation);
        Self {
            set,
            snapshot_generation,
            read_set: FxHashMap::default(),
            write_set: BTreeMap::new(),
            status: Status::Staged,
            pin: Some(pin),
        }
    }

    /// The generation this transaction's reads are pinned to.
    pub fn snapshot_generation(&self) -> u64 {
        self.snapshot_generation
    }

    /// Current lifecycle state.
    pub fn status(&self) -> Status {
        self.status
    }

    fn ensure_active(&self) -> Result<()> {
        match self.status {
            Status::Staged => Ok(()),
            Status::Committed => Err(Error::InvalidState(
                "operation on a committed transaction",
            )),
            Status::Aborted => Err(Error::InvalidState("operation on an aborted transaction")),
        }
    }

    /// Register `key` in the read set, recording the generation of the
    /// version visible at this transaction's snapshot (0 if absent), and
    /// return that version.
    ///
    /// Idempotent: watching a key twice keeps the first recorded
    /// generation. Commit validation re-checks every watched key.
    pub fn watch(&mut self, key: &K) -> Result<Lookup<V>> {
        self.ensure_active()?;
        match self.set.store.lookup_entry(key, self.snapshot_generation) {
            Some(entry) => {
                self.read_set.entry(key.clone()).or_insert(Watched {
                    generation: entry.generation,
                    tombstone: entry.payload.is_tombstone(),
                });
                tracing::trace!(generation = entry.generation, "watch recorded");
                Ok(entry.payload.into())
            }
            None => {
                self.read_set.entry(key.clone()).or_insert(Watched {
                    generation: 0,
                    tombstone: false,
                });
                tracing::trace!("watch recorded absent key");
                Ok(Lookup::Absent)
            }
        }
    }

    /// Read `key` at this transaction's snapshot, seeing the transaction's
    /// own staged writes first (read-your-own-writes). Does not register a
    /// watch.
    pub fn get(&self, key: &K) -> Result<Lookup<V>> {
        self.ensure_active()?;
        if let Some(staged) = self.write_set.get(key) {
            return Ok(staged.clone().into());
        }
        Ok(self.set.store.lookup(key, self.snapshot_generation))
    }

    /// Stage an upsert, overwriting any prior staged write for `key`.
    pub fn put(&mut self, key: K, value: V) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert(key, Payload::Value(value));
        Ok(())
    }

    /// Stage a removal, overwriting any prior staged write for `key`.
    pub fn remove(&mut self, key: K) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert(key, Payload::Tombstone);
        Ok(())
    }

    /// Ordered scan over `range` at this transaction's snapshot, with the
    /// transaction's staged writes overlaid. Tombstoned and
    /// staged-for-removal keys are skipped.
    pub fn scan<R>(&self, range: R) -> Result<impl Iterator<Item = (K, V)> + '_>
    where
        R: RangeBounds<K>,
    {
        self.ensure_active()?;
        let (lower, upper) = clone_bounds(&range);
        let staged = self.write_set.range((lower.clone(), upper.clone()));
        let published = self
            .set
            .store
            .scan(lower, upper, self.snapshot_generation);
        Ok(MergedScan {
            staged: staged.peekable(),
            published: published.peekable(),
        })
    }

    /// Number of staged writes.
    pub fn pending_writes(&self) -> usize {
        self.write_set.len()
    }

    /// Validate the read set and, on success, publish the write set at a
    /// freshly allocated generation.
    ///
    /// Returns the commit generation. Fails with [`Error::Conflict`] if any
    /// watched key's visible generation changed since it was observed; the
    /// transaction is then aborted and nothing was published. Keys written
    /// without being watched are not validated — callers needing stricter
    /// isolation must watch every key they write.
    ///
    /// A commit with an empty write set still validates its watches; on
    /// success it publishes nothing and returns the current committed
    /// generation.
    pub fn commit(&mut self) -> Result<u64> {
        self.ensure_active()?;
        let _commit_guard = self.set.commit_lock.lock();

        // Validate against the latest committed state, not our snapshot:
        // any commit to a watched key since we observed it is a conflict.
        let committed = self.set.clock.current();
        for (key, watched) in &self.read_set {
            let current = self.set.store.visible_generation(key, committed);
            if current == watched.generation {
                continue;
            }
            // A watched terminal tombstone may have been reclaimed by
            // compaction; the key then reads as absent but is still
            // deleted, so the observation holds.
            if watched.tombstone && current == 0 {
                continue;
            }
            self.status = Status::Aborted;
            self.pin = None;
            tracing::debug!(
                observed = watched.generation,
                current,
                "commit validation failed"
            );
            return Err(Error::Conflict {
                observed: watched.generation,
                current,
            });
        }

        if self.write_set.is_empty() {
            self.status = Status::Committed;
            self.pin = None;
            return Ok(committed);
        }

        let generation = self.set.clock.allocate_next();
        let batch = std::mem::take(&mut self.write_set);
        let writes = batch.len();
        self.set.store.publish(generation, batch);
        // The batch is fully inserted; advancing the watermark makes it
        // visible to new readers all at once.
        self.set.clock.advance_to(generation);

        self.status = Status::Committed;
        self.pin = None;
        tracing::debug!(generation, writes, "transaction committed");
        Ok(generation)
    }

    /// Discard the staged writes and release the registry pin.
    ///
    /// Always succeeds on a live transaction; fails with `InvalidState` if
    /// the transaction already terminated.
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = Status::Aborted;
        self.write_set.clear();
        self.read_set.clear();
        self.pin = None;
        tracing::debug!("transaction aborted");
        Ok(())
    }
}

/// Two-way ordered merge of staged writes over published entries. On equal
/// keys the staged side wins and the published version is skipped.
struct MergedScan<'a, K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    staged: Peekable<std::collections::btree_map::Range<'a, K, Payload<V>>>,
    published: Peekable<Scan<'a, K, V>>,
}

impl<K, V> Iterator for MergedScan<'_, K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let staged_wins = match (self.staged.peek(), self.published.peek()) {
                (None, None) => return None,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some((staged_key, _)), Some(published)) => {
                    match (*staged_key).cmp(&published.key) {
                        std::cmp::Ordering::Less => true,
                        std::cmp::Ordering::Greater => false,
                        std::cmp::Ordering::Equal => {
                            // Staged write shadows the published version.
                            self.published.next();
                            true
                        }
                    }
                }
            };
            let (key, payload) = if staged_wins {
                let (key, payload) = self.staged.next()?;
                (key.clone(), payload.clone())
            } else {
                let entry = self.published.next()?;
                (entry.key, entry.payload)
            };
            if let Payload::Value(value) = payload {
                return Some((key, value));
            }
        }
    }
}
