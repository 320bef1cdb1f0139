//! Key-ordered store of versioned entries.
//!
//! Backed by a lock-free skip list keyed by (key, generation descending),
//! so the newest version of a key is the first element of its run. Reads
//! never take a lock; `publish` is serialized by the owning set's commit
//! section but runs concurrently with readers.
//!
//! Commit atomicity is a two-step protocol: a commit's entries are inserted
//! first, and only then does the committed-generation watermark advance.
//! Readers pin their `as_of` to an already-published watermark, so they can
//! never observe a partially inserted batch.

use std::ops::{Bound, RangeBounds};

use crossbeam_skiplist::map;
use crossbeam_skiplist::SkipMap;

use crate::entry::{Entry, Lookup, Payload, VersionKey};

/// Clone the bounds of a key range into owned form, so iterators can hold
/// them across probes.
pub(crate) fn clone_bounds<K, R>(range: &R) -> (Bound<K>, Bound<K>)
where
    K: Clone,
    R: RangeBounds<K>,
{
    (range.start_bound().cloned(), range.end_bound().cloned())
}

/// Ordered collection of all entries not yet compacted.
///
/// Holds at most one entry per (key, generation) pair. The store owns its
/// entries exclusively; readers receive cloned payloads.
pub(crate) struct VersionedStore<K, V> {
    entries: SkipMap<VersionKey<K>, Payload<V>>,
}

impl<K, V> VersionedStore<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
        }
    }

    /// Total number of entries, superseded versions included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest entry for `key` with generation `<= as_of`, if any.
    fn newest_visible(
        &self,
        key: &K,
        as_of: u64,
    ) -> Option<map::Entry<'_, VersionKey<K>, Payload<V>>> {
        if as_of == 0 {
            return None;
        }
        let newest = VersionKey {
            key: key.clone(),
            generation: as_of,
        };
        let oldest = VersionKey {
            key: key.clone(),
            generation: 1,
        };
        self.entries.range(newest..=oldest).next()
    }

    /// Payload of the newest entry for `key` visible at `as_of`.
    pub fn lookup(&self, key: &K, as_of: u64) -> Lookup<V> {
        match self.newest_visible(key, as_of) {
            Some(found) => found.value().clone().into(),
            None => Lookup::Absent,
        }
    }

    /// Full entry (payload and generation) visible at `as_of`.
    pub fn lookup_entry(&self, key: &K, as_of: u64) -> Option<Entry<K, V>> {
        self.newest_visible(key, as_of).map(|found| Entry {
            key: found.key().key.clone(),
            payload: found.value().clone(),
            generation: found.key().generation,
        })
    }

    /// Generation of the version visible at `as_of`, or 0 if the key is
    /// absent. This is the value recorded by `watch` and re-checked by
    /// commit validation; it never clones the payload.
    pub fn visible_generation(&self, key: &K, as_of: u64) -> u64 {
        self.newest_visible(key, as_of)
            .map(|found| found.key().generation)
            .unwrap_or(0)
    }

    /// Ordered iteration over keys in `[lower, upper]` as of a fixed
    /// generation: one element per key, the newest version `<= as_of`,
    /// tombstones included. Keys with no version at `as_of` are skipped.
    pub fn scan(&self, lower: Bound<K>, upper: Bound<K>, as_of: u64) -> Scan<'_, K, V> {
        let lower = match lower {
            Bound::Included(key) => Bound::Included(VersionKey {
                key,
                generation: u64::MAX,
            }),
            Bound::Excluded(key) => Bound::Excluded(VersionKey { key, generation: 0 }),
            Bound::Unbounded => Bound::Unbounded,
        };
        let upper = match upper {
            Bound::Included(key) => Bound::Included(VersionKey { key, generation: 0 }),
            Bound::Excluded(key) => Bound::Excluded(VersionKey {
                key,
                generation: u64::MAX,
            }),
            Bound::Unbounded => Bound::Unbounded,
        };
        Scan {
            entries: &self.entries,
            as_of,
            lower,
            upper,
        }
    }

    /// Insert one commit's entries, all stamped with the same generation.
    ///
    /// Callers serialize publishes through the commit section; the batch
    /// becomes visible only once the watermark advances past `generation`.
    pub fn publish<I>(&self, generation: u64, batch: I)
    where
        I: IntoIterator<Item = (K, Payload<V>)>,
    {
        for (key, payload) in batch {
            self.entries.insert(VersionKey { key, generation }, payload);
        }
    }

    /// Drop entries wholly superseded below `floor`.
    ///
    /// For each key, among the entries with generation `<= floor` only the
    /// newest survives; a tombstone that is the newest entry for its key
    /// overall is dropped with everything beneath it. Entries above the
    /// floor are never touched. Returns the number of entries reclaimed.
    ///
    /// Removal order matters for lock-free readers: a droppable terminal
    /// tombstone is removed only after every older entry it shadows, so a
    /// concurrent lookup never finds a stale value standing in for a
    /// deleted key.
    pub fn remove_entries_older_than(&self, floor: u64) -> usize {
        let mut removed = 0;
        let mut current_key: Option<K> = None;
        let mut shadowed_above = false;
        let mut keeper_seen = false;
        let mut pending_tombstone: Option<map::Entry<'_, VersionKey<K>, Payload<V>>> = None;

        for entry in self.entries.iter() {
            let vk = entry.key();
            if current_key.as_ref() != Some(&vk.key) {
                // Previous key's run is fully swept; its tombstone can go.
                if let Some(tombstone) = pending_tombstone.take() {
                    if tombstone.remove() {
                        removed += 1;
                    }
                }
                current_key = Some(vk.key.clone());
                shadowed_above = false;
                keeper_seen = false;
            }
            if vk.generation > floor {
                shadowed_above = true;
                continue;
            }
            if !keeper_seen {
                keeper_seen = true;
                // Terminal tombstone: no newer version exists and no live
                // snapshot can observe the deletion point. Hold it until
                // the entries beneath it are removed.
                if !shadowed_above && entry.value().is_tombstone() {
                    pending_tombstone = Some(entry);
                }
                continue;
            }
            if entry.remove() {
                removed += 1;
            }
        }
        if let Some(tombstone) = pending_tombstone.take() {
            if tombstone.remove() {
                removed += 1;
            }
        }
        removed
    }
}

/// Lazy, restartable scan over the newest visible version of each key in a
/// range. Each step re-probes the skip list from the last position, so the
/// iterator stays valid across concurrent publishes and compaction (both of
/// which only touch generations outside the pinned `as_of` window).
pub(crate) struct Scan<'a, K, V> {
    entries: &'a SkipMap<VersionKey<K>, Payload<V>>,
    as_of: u64,
    lower: Bound<VersionKey<K>>,
    upper: Bound<VersionKey<K>>,
}

impl<K, V> Iterator for Scan<'_, K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    type Item = Entry<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.as_of == 0 {
            return None;
        }
        loop {
            let found = self
                .entries
                .range((self.lower.as_ref(), self.upper.as_ref()))
                .next()?;
            let vk = found.key();
            if vk.generation > self.as_of {
                // Too new for this snapshot; jump to the first version of
                // this key at or below `as_of`.
                self.lower = Bound::Included(VersionKey {
                    key: vk.key.clone(),
                    generation: self.as_of,
                });
                continue;
            }
            let result = Entry {
                key: vk.key.clone(),
                payload: found.value().clone(),
                generation: vk.generation,
            };
            // Skip the remaining (older) versions of this key.
            self.lower = Bound::Excluded(VersionKey {
                key: vk.key.clone(),
                generation: 0,
            });
            return Some(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with<const N: usize>(
        versions: [(&str, u64, Payload<i64>); N],
    ) -> VersionedStore<String, i64> {
        let store = VersionedStore::new();
        for (key, generation, payload) in versions {
            store.publish(generation, [(key.to_string(), payload)]);
        }
        store
    }

    fn key(k: &str) -> String {
        k.to_string()
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    #[test]
    fn lookup_empty_store_is_absent() {
        let store: VersionedStore<String, i64> = VersionedStore::new();
        assert_eq!(store.lookup(&key("a"), 10), Lookup::Absent);
    }

    #[test]
    fn lookup_at_zero_generation_is_absent() {
        let store = store_with([("a", 1, Payload::Value(1))]);
        assert_eq!(store.lookup(&key("a"), 0), Lookup::Absent);
    }

    #[test]
    fn lookup_sees_newest_at_or_below_as_of() {
        let store = store_with([
            ("a", 1, Payload::Value(10)),
            ("a", 3, Payload::Value(30)),
            ("a", 5, Payload::Value(50)),
        ]);
        assert_eq!(store.lookup(&key("a"), 1), Lookup::Value(10));
        assert_eq!(store.lookup(&key("a"), 2), Lookup::Value(10));
        assert_eq!(store.lookup(&key("a"), 3), Lookup::Value(30));
        assert_eq!(store.lookup(&key("a"), 4), Lookup::Value(30));
        assert_eq!(store.lookup(&key("a"), 100), Lookup::Value(50));
    }

    #[test]
    fn lookup_before_first_version_is_absent() {
        let store = store_with([("a", 5, Payload::Value(50))]);
        assert_eq!(store.lookup(&key("a"), 4), Lookup::Absent);
    }

    #[test]
    fn lookup_sees_tombstone() {
        let store = store_with([("a", 1, Payload::Value(10)), ("a", 2, Payload::Tombstone)]);
        assert_eq!(store.lookup(&key("a"), 1), Lookup::Value(10));
        assert_eq!(store.lookup(&key("a"), 2), Lookup::Tombstone);
    }

    #[test]
    fn visible_generation_returns_zero_for_absent() {
        let store = store_with([("a", 3, Payload::Value(1))]);
        assert_eq!(store.visible_generation(&key("a"), 2), 0);
        assert_eq!(store.visible_generation(&key("b"), 10), 0);
        assert_eq!(store.visible_generation(&key("a"), 3), 3);
        assert_eq!(store.visible_generation(&key("a"), 9), 3);
    }

    #[test]
    fn lookup_entry_carries_generation() {
        let store = store_with([("a", 2, Payload::Value(20))]);
        let entry = store.lookup_entry(&key("a"), 5).unwrap();
        assert_eq!(entry.generation, 2);
        assert_eq!(entry.payload, Payload::Value(20));
    }

    // ========================================================================
    // Scan
    // ========================================================================

    #[test]
    fn scan_yields_one_version_per_key_in_order() {
        let store = store_with([
            ("b", 1, Payload::Value(1)),
            ("a", 2, Payload::Value(2)),
            ("c", 3, Payload::Value(3)),
            ("a", 4, Payload::Value(40)),
        ]);
        let seen: Vec<_> = store
            .scan(Bound::Unbounded, Bound::Unbounded, 4)
            .map(|e| (e.key, e.generation))
            .collect();
        assert_eq!(
            seen,
            vec![(key("a"), 4), (key("b"), 1), (key("c"), 3)]
        );
    }

    #[test]
    fn scan_is_pinned_to_as_of() {
        let store = store_with([
            ("a", 1, Payload::Value(1)),
            ("a", 5, Payload::Value(5)),
            ("b", 5, Payload::Value(5)),
        ]);
        let seen: Vec<_> = store
            .scan(Bound::Unbounded, Bound::Unbounded, 2)
            .map(|e| (e.key, e.generation))
            .collect();
        // "b" did not exist at generation 2.
        assert_eq!(seen, vec![(key("a"), 1)]);
    }

    #[test]
    fn scan_includes_tombstones() {
        let store = store_with([("a", 1, Payload::Value(1)), ("a", 2, Payload::Tombstone)]);
        let seen: Vec<_> = store
            .scan(Bound::Unbounded, Bound::Unbounded, 2)
            .map(|e| e.payload)
            .collect();
        assert_eq!(seen, vec![Payload::Tombstone]);
    }

    #[test]
    fn scan_respects_range_bounds() {
        let store = store_with([
            ("a", 1, Payload::Value(1)),
            ("b", 1, Payload::Value(2)),
            ("c", 1, Payload::Value(3)),
            ("d", 1, Payload::Value(4)),
        ]);
        let seen: Vec<_> = store
            .scan(Bound::Included(key("b")), Bound::Excluded(key("d")), 1)
            .map(|e| e.key)
            .collect();
        assert_eq!(seen, vec![key("b"), key("c")]);

        let seen: Vec<_> = store
            .scan(Bound::Excluded(key("a")), Bound::Included(key("c")), 1)
            .map(|e| e.key)
            .collect();
        assert_eq!(seen, vec![key("b"), key("c")]);
    }

    #[test]
    fn scan_at_zero_generation_is_empty() {
        let store = store_with([("a", 1, Payload::Value(1))]);
        assert_eq!(store.scan(Bound::Unbounded, Bound::Unbounded, 0).count(), 0);
    }

    // ========================================================================
    // Compaction primitive
    // ========================================================================

    #[test]
    fn compaction_drops_shadowed_versions_below_floor() {
        let store = store_with([
            ("a", 1, Payload::Value(1)),
            ("a", 2, Payload::Value(2)),
            ("a", 3, Payload::Value(3)),
        ]);
        let removed = store.remove_entries_older_than(3);
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(&key("a"), 3), Lookup::Value(3));
    }

    #[test]
    fn compaction_never_touches_entries_above_floor() {
        let store = store_with([
            ("a", 1, Payload::Value(1)),
            ("a", 5, Payload::Value(5)),
            ("a", 7, Payload::Value(7)),
        ]);
        let removed = store.remove_entries_older_than(4);
        // Generation 1 is the newest at or below the floor; 5 and 7 are
        // above it. Nothing is shadowed within the floor window.
        assert_eq!(removed, 0);
        assert_eq!(store.len(), 3);
        assert_eq!(store.lookup(&key("a"), 4), Lookup::Value(1));
    }

    #[test]
    fn compaction_keeps_newest_below_floor_when_newer_exist() {
        let store = store_with([
            ("a", 1, Payload::Value(1)),
            ("a", 2, Payload::Value(2)),
            ("a", 9, Payload::Value(9)),
        ]);
        let removed = store.remove_entries_older_than(5);
        assert_eq!(removed, 1); // generation 1 shadowed by 2
        assert_eq!(store.lookup(&key("a"), 5), Lookup::Value(2));
        assert_eq!(store.lookup(&key("a"), 9), Lookup::Value(9));
    }

    #[test]
    fn compaction_drops_terminal_tombstone() {
        let store = store_with([
            ("a", 1, Payload::Value(1)),
            ("a", 2, Payload::Tombstone),
            ("b", 3, Payload::Value(3)),
        ]);
        let removed = store.remove_entries_older_than(3);
        // "a" is gone entirely: the tombstone is terminal and below floor.
        assert_eq!(removed, 2);
        assert_eq!(store.lookup(&key("a"), 3), Lookup::Absent);
        assert_eq!(store.lookup(&key("b"), 3), Lookup::Value(3));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn compaction_keeps_tombstone_shadowed_by_newer_version() {
        let store = store_with([
            ("a", 2, Payload::Tombstone),
            ("a", 9, Payload::Value(9)),
        ]);
        let removed = store.remove_entries_older_than(5);
        // The tombstone is the newest entry at or below the floor and a
        // newer live version exists above it, so it must survive.
        assert_eq!(removed, 0);
        assert_eq!(store.lookup(&key("a"), 5), Lookup::Tombstone);
    }

    #[test]
    fn compaction_with_zero_floor_is_a_no_op() {
        let store = store_with([("a", 1, Payload::Value(1)), ("a", 2, Payload::Value(2))]);
        assert_eq!(store.remove_entries_older_than(0), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn compaction_handles_many_keys() {
        let store = store_with([
            ("a", 1, Payload::Value(1)),
            ("a", 2, Payload::Value(2)),
            ("b", 1, Payload::Value(1)),
            ("b", 3, Payload::Tombstone),
            ("c", 4, Payload::Value(4)),
        ]);
        let removed = store.remove_entries_older_than(4);
        // "a": gen 1 shadowed. "b": tombstone terminal, both entries go.
        // "c": single live entry survives.
        assert_eq!(removed, 3);
        assert_eq!(store.lookup(&key("a"), 4), Lookup::Value(2));
        assert_eq!(store.lookup(&key("b"), 4), Lookup::Absent);
        assert_eq!(store.lookup(&key("c"), 4), Lookup::Value(4));
    }
}
