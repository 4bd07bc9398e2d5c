//! Error taxonomy for the ordered key-value engine.

use std::path::PathBuf;

/// Failures surfaced by [`crate::handle::DbHandle`].
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The requested key does not exist.
    #[error("key not found")]
    NotFound,

    /// The on-disk database failed to open even after a repair attempt.
    #[error("database at {path} is corrupt and could not be repaired: {source}")]
    Corruption {
        /// Database file path.
        path: PathBuf,
        /// The underlying engine error.
        #[source]
        source: redb::DatabaseError,
    },

    /// A transient I/O failure survived every retry.
    #[error("storage operation failed after retrying: {0}")]
    Io(#[from] std::io::Error),

    /// Any other engine-level failure (transaction, table or commit error).
    #[error("storage engine error: {0}")]
    Storage(String),

    /// `open` was asked to abort rather than attempt a repair, and the
    /// database needed one.
    #[error("database at {path} requires repair; open aborted")]
    AbortOnOpen {
        /// Database file path.
        path: PathBuf,
    },
}

impl From<redb::TransactionError> for KvError {
    fn from(err: redb::TransactionError) -> Self {
        KvError::Storage(err.to_string())
    }
}

impl From<redb::TableError> for KvError {
    fn from(err: redb::TableError) -> Self {
        KvError::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for KvError {
    fn from(err: redb::CommitError) -> Self {
        KvError::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for KvError {
    fn from(err: redb::StorageError) -> Self {
        KvError::Storage(err.to_string())
    }
}
