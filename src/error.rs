//! Error types for the consistent-set engine.
//!
//! Every failure is returned as an explicit value; the store is never left
//! in a state that mixes entries from a failed commit.

use thiserror::Error;

/// All consistent-set errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Operation attempted on a terminal (committed or aborted) transaction.
    ///
    /// Always a caller bug; the caller must begin a new transaction.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Commit validation detected a changed read-set generation.
    ///
    /// Expected under contention. The caller recovers by re-reading fresh
    /// data in a new transaction and retrying.
    #[error("conflict: watched key changed (observed generation {observed}, found {current})")]
    Conflict {
        /// Generation recorded when the key was watched.
        observed: u64,
        /// Generation visible at validation time.
        current: u64,
    },
}

/// Result type for consistent-set operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error may succeed on retry with fresh data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this is a commit conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this is a transaction lifecycle violation.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_retryable() {
        let err = Error::Conflict {
            observed: 1,
            current: 2,
        };
        assert!(err.is_retryable());
        assert!(err.is_conflict());
        assert!(!err.is_invalid_state());
    }

    #[test]
    fn invalid_state_is_not_retryable() {
        let err = Error::InvalidState("transaction already terminated");
        assert!(!err.is_retryable());
        assert!(err.is_invalid_state());
    }

    #[test]
    fn display_formats() {
        let err = Error::Conflict {
            observed: 3,
            current: 7,
        };
        let text = err.to_string();
        assert!(text.contains("observed generation 3"));
        assert!(text.contains("found 7"));
    }
}
