//! Active-reader registry.
//!
//! Tracks the generation every live transaction or snapshot depends on.
//! The minimum over the registered set is the compaction floor: no entry
//! visible at or above it may be reclaimed. Registration is released
//! through an RAII pin, so every exit path (commit, abort, or plain drop)
//! unpins and the floor can never be held down by a leaked reader.

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Refcounted multiset of pinned generations.
#[derive(Debug)]
pub(crate) struct ReaderRegistry {
    pinned: Mutex<BTreeMap<u64, usize>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self {
            pinned: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a reader at `generation`; the pin releases on drop.
    pub fn pin(&self, generation: u64) -> ReaderPin<'_> {
        let mut pinned = self.pinned.lock();
        *pinned.entry(generation).or_insert(0) += 1;
        ReaderPin {
            registry: self,
            generation,
        }
    }

    /// Minimum pinned generation, or `default` when no readers are live.
    pub fn floor(&self, default: u64) -> u64 {
        self.pinned
            .lock()
            .keys()
            .next()
            .copied()
            .unwrap_or(default)
    }

    /// Number of live readers.
    pub fn len(&self) -> usize {
        self.pinned.lock().values().sum()
    }

    fn unpin(&self, generation: u64) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&generation);
            }
        }
    }
}

/// RAII registration of one reader in the registry.
#[derive(Debug)]
pub(crate) struct ReaderPin<'a> {
    registry: &'a ReaderRegistry,
    generation: u64,
}

impl Drop for ReaderPin<'_> {
    fn drop(&mut self) {
        self.registry.unpin(self.generation);
    }
}
