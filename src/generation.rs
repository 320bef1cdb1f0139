//! Generation allocation and the committed watermark.
//!
//! A generation is the unit of logical time: every commit publishes its
//! entries at a freshly allocated generation, and every reader pins a
//! generation as its snapshot. The clock is owned by the set instance;
//! there is no process-wide counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic clock of committed generations.
///
/// `committed` is the watermark of the latest fully published commit.
/// Allocation happens only inside the commit section, so generations are
/// strictly increasing and never reused; advancing the watermark is the
/// single act that makes a commit's batch visible to new readers.
#[derive(Debug)]
pub(crate) struct GenerationClock {
    committed: AtomicU64,
}

impl GenerationClock {
    /// Start at generation 0, reserved for "no data".
    pub fn new() -> Self {
        Self {
            committed: AtomicU64::new(0),
        }
    }

    /// Latest committed generation; the snapshot point for new readers.
    #[inline]
    pub fn current(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Reserve the next generation. Must only be called while holding the
    /// commit section, which linearizes allocation with publication.
    ///
    /// # Panics
    ///
    /// Exhausting the 64-bit generation space is a fatal invariant
    /// violation; it cannot be reached by any realistic workload.
    pub fn allocate_next(&self) -> u64 {
        let current = self.current();
        assert!(current < u64::MAX, "generation space exhausted");
        current + 1
    }

    /// Publish the watermark after a commit's batch is fully inserted.
    #[inline]
    pub fn advance_to(&self, generation: u64) {
        self.committed.store(generation, Ordering::Release);
    }
}
