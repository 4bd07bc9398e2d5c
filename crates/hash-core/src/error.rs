//! Error taxonomy for the hashing primitives (Tiger tree, CRC-32, SFV).

use std::path::PathBuf;

/// Failures that can occur while building or parsing the pure hashing
/// primitives. None of these escape past `hash-store`/`hash-pipeline`
/// without being translated into their own error types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A serialized tree's leaf section length was not a multiple of
    /// [`crate::root::ROOT_BYTES`].
    #[error("tree data length {len} is not a multiple of the root size")]
    MalformedTreeData {
        /// Byte length of the offending buffer.
        len: usize,
    },

    /// An SFV manifest could not be read or parsed.
    #[error("failed to read SFV manifest {path}: {source}")]
    SfvRead {
        /// Path of the manifest that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// An SFV manifest exceeded the 1 MiB size cap and was rejected.
    #[error("SFV manifest {path} is too large ({size} bytes)")]
    SfvTooLarge {
        /// Path of the oversized manifest.
        path: PathBuf,
        /// Its size in bytes.
        size: u64,
    },
}
