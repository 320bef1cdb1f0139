//! Versioned entry representation.
//!
//! An [`Entry`] is one immutable (key, payload, generation) record. Entries
//! for the same key form a total order by generation; the value visible at
//! generation `g` is the payload of the entry with the largest generation
//! `<= g`.

use std::cmp::Ordering;

/// The stored state of a key at one generation: a value, or a deletion
/// marker meaning "removed as of this generation".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<V> {
    /// A live value.
    Value(V),
    /// The key was deleted at this generation.
    Tombstone,
}

impl<V> Payload<V> {
    /// Check if this payload is a deletion marker.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Payload::Tombstone)
    }

    /// Borrow the value, if any.
    pub fn as_value(&self) -> Option<&V> {
        match self {
            Payload::Value(v) => Some(v),
            Payload::Tombstone => None,
        }
    }

    /// Consume the payload, returning the value if any.
    pub fn into_value(self) -> Option<V> {
        match self {
            Payload::Value(v) => Some(v),
            Payload::Tombstone => None,
        }
    }
}

/// Result of a point lookup: a value, a deletion marker, or no entry at
/// all. Absence is a normal outcome, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// A live value was visible at the requested generation.
    Value(V),
    /// The key was deleted as of the requested generation.
    Tombstone,
    /// No entry for the key existed at the requested generation.
    Absent,
}

impl<V> Lookup<V> {
    /// Check if no entry was visible.
    pub fn is_absent(&self) -> bool {
        matches!(self, Lookup::Absent)
    }

    /// Check if the visible entry was a deletion marker.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Lookup::Tombstone)
    }

    /// Borrow the value, folding tombstone and absence into `None`.
    pub fn as_value(&self) -> Option<&V> {
        match self {
            Lookup::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Consume the lookup, returning the value if one was visible.
    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<V> From<Payload<V>> for Lookup<V> {
    fn from(payload: Payload<V>) -> Self {
        match payload {
            Payload::Value(v) => Lookup::Value(v),
            Payload::Tombstone => Lookup::Tombstone,
        }
    }
}

/// One versioned record: a key, its payload, and the generation at which
/// this version became visible. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    /// The key this version belongs to.
    pub key: K,
    /// Value or deletion marker.
    pub payload: Payload<V>,
    /// Logical commit time of this version.
    pub generation: u64,
}

/// Composite ordering key for the store: key ascending, then generation
/// descending, so the newest version of a key is the first element of its
/// run in any ordered scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VersionKey<K> {
    pub key: K,
    pub generation: u64,
}

impl<K: Ord> Ord for VersionKey<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl<K: Ord> PartialOrd for VersionKey<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
