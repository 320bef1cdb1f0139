//! # consistent-set
//!
//! Generic, in-memory, versioned associative container with multi-version
//! concurrency control: many readers observe consistent point-in-time
//! snapshots while writers stage speculative changes and commit them only
//! if no watched key changed concurrently.
//!
//! This is the transactional engine underneath a storage layer — use it to
//! build key-value stores, indexes, or any structure needing
//! optimistic-concurrency transactions without blocking readers.
//!
//! ## Quick start
//!
//! ```
//! use consistent_set::{ConsistentSet, Lookup};
//!
//! let set: ConsistentSet<String, i64> = ConsistentSet::new();
//!
//! // Optimistic transaction: watch what you read, stage writes, commit.
//! let mut txn = set.begin_transaction();
//! let balance = txn.watch(&"balance".to_string())?;
//! assert_eq!(balance, Lookup::Absent);
//! txn.put("balance".to_string(), 100)?;
//! let generation = txn.commit()?;
//! assert_eq!(generation, 1);
//!
//! // Snapshots pin a generation: later commits stay invisible.
//! let snapshot = set.begin_snapshot();
//! set.put("balance".to_string(), 250);
//! assert_eq!(snapshot.get(&"balance".to_string()), Some(100));
//!
//! // Reclaim superseded versions nobody can observe anymore.
//! drop(snapshot);
//! set.maintenance_tick();
//! # Ok::<(), consistent_set::Error>(())
//! ```
//!
//! ## Concurrency model
//!
//! - Reads are lock-free: lookups, scans, and watches never block on
//!   commits in progress.
//! - Commits are mutually exclusive with each other; validation, generation
//!   allocation, and publication happen in one short critical section.
//! - Compaction shares the commit section and never disturbs readers above
//!   the floor (the oldest generation a live reader still references).
//!
//! Conflict detection is read-set based: a commit fails with
//! [`Error::Conflict`] only if a *watched* key changed. Writes to
//! unwatched keys are blind — last committer wins.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod entry;
mod error;
mod generation;
mod registry;
mod set;
mod snapshot;
mod store;
mod transaction;

pub use entry::{Entry, Lookup, Payload};
pub use error::{Error, Result};
pub use set::{CompactionStats, ConsistentSet};
pub use snapshot::Snapshot;
pub use transaction::{Status, Transaction};
