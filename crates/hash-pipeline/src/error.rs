//! Error taxonomy for the file-reading and configuration edges of the
//! pipeline. Storage failures are `hashstore_db::StoreError` and flow
//! through unchanged; they are not re-wrapped here.

use std::path::PathBuf;

/// Failures encountered while a worker is reading and hashing a single
/// file. Reported as a `FileFailed` event; the worker moves on to the
/// next queued item rather than propagating this anywhere.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// The file could not be opened or stat'd.
    #[error("could not open {path}: {source}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A read returned a negative/invalid modification time, which the
    /// original platform APIs use to signal failure.
    #[error("invalid modification time for {0}")]
    InvalidModificationTime(PathBuf),

    /// A read failed partway through.
    #[error("read error on {path}: {source}")]
    Read {
        /// Path being read when the failure occurred.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file's real CRC-32 did not match its SFV manifest entry.
    #[error("CRC mismatch for {path}: expected {expected:08X}, got {actual:08X}")]
    CrcMismatch {
        /// Path that failed verification.
        path: PathBuf,
        /// Value recorded in the SFV manifest.
        expected: u32,
        /// Value actually computed while hashing.
        actual: u32,
    },
}

/// Failures loading a [`crate::config::HashConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The config file's TOML was malformed.
    #[error("invalid config TOML in {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: toml::de::Error,
    },

    /// A value was syntactically valid but out of the allowed range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}
