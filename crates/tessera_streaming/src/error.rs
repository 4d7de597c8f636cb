//! # Streaming Error Types
//!
//! Three families:
//!
//! - `InvalidState`: the caller broke the counting contract (unbalanced
//!   unsubscribe, negative radius). Nothing was changed.
//! - `Storage`: the store failed. Recoverable; the region is put back in
//!   the queue it came from.
//! - `InvariantViolation`: the worker found a state the transition table
//!   cannot produce. The worker stops.

use thiserror::Error;

use tessera_core::RegionKey;

use crate::state::LoadState;

/// Errors raised by an [`crate::EntityStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Read or write failed.
    #[error("i/o error: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("corrupt region data: {reason}")]
    Corrupt {
        /// What was wrong with the data.
        reason: String,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the streaming cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamingError {
    /// Subscription counts would become invalid.
    #[error("invalid subscription state for {key}: {reason}")]
    InvalidState {
        /// First region that failed validation.
        key: RegionKey,
        /// Why the request was rejected.
        reason: String,
    },

    /// Loading or saving a region failed.
    #[error("storage failure for {key}: {source}")]
    Storage {
        /// Region being loaded or saved.
        key: RegionKey,
        /// Underlying store error.
        #[source]
        source: StorageError,
    },

    /// The worker found a region in a state the transition table forbids.
    #[error("invariant violated for {key}: found {found:?}, expected {expected}")]
    InvariantViolation {
        /// Offending region.
        key: RegionKey,
        /// State actually found (`None` if the entry was missing).
        found: Option<LoadState>,
        /// What the worker expected.
        expected: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker thread could not be started.
    #[error("failed to spawn streaming worker: {0}")]
    WorkerSpawn(String),
}

/// Result type for streaming operations.
pub type StreamingResult<T> = Result<T, StreamingError>;
