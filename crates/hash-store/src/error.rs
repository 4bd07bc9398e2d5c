//! Error taxonomy surfaced by the hash store's query and mutation surface.

use hashstore_kv::KvError;

/// Failures that can escape [`crate::store::HashStore`].
///
/// `NotFound` and `Corruption` are deliberately absent here: per the
/// contract, absence and corruption are swallowed into `false`/`None`
/// return values at the call site, not raised as errors. Only durable
/// storage failures and the rename precondition check propagate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `put`/`remove`/open failed after the underlying engine's retry
    /// budget was exhausted.
    #[error("storage error: {0}")]
    Storage(#[from] KvError),

    /// `rename_file` found that the destination's size does not match the
    /// size already recorded for the source path.
    #[error("rename precondition failed: {old} -> {new} size mismatch ({old_size} != {new_size})")]
    RenameSizeMismatch {
        /// Source path (lowercased).
        old: String,
        /// Destination path (lowercased).
        new: String,
        /// Size recorded under the source path.
        old_size: i64,
        /// Size observed by statting the destination.
        new_size: i64,
    },

    /// `rename_file`'s source path had no FileIndex entry to move.
    #[error("rename source {0} has no file index entry")]
    RenameSourceMissing(String),

    /// `rename_file`'s destination could not be statted on disk.
    #[error("rename destination {0} could not be statted")]
    RenameDestinationUnreadable(String),
}

/// Selector for [`crate::store::HashStore::get_root_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootInfoKind {
    /// The tree's recorded file size.
    FileSize,
    /// The tree's leaf block size.
    BlockSize,
}
