//! Notification surface replacing the intrusive listener (Speaker/Listener)
//! pattern with a fixed set of events pushed onto a channel per subscriber.

use std::path::PathBuf;
use std::time::Duration;

use hashstore_core::RootValue;
use hashstore_db::OptimizeReport;

/// Something a caller may want to react to: progress, completion,
/// failure, or maintenance lifecycle.
#[derive(Debug, Clone)]
pub enum HashEvent {
    /// A file finished hashing successfully and was persisted.
    FileHashed {
        /// Path that was hashed.
        path: PathBuf,
        /// The resulting content address.
        root: RootValue,
        /// Effective hashing speed.
        speed_bytes_per_sec: u64,
    },
    /// A file failed to hash (I/O error, CRC mismatch) or was cancelled.
    FileFailed {
        /// Path that failed.
        path: PathBuf,
        /// Human-readable reason, already rendered (errors don't cross
        /// thread boundaries well as trait objects).
        reason: String,
    },
    /// A worker finished a directory's worth of files (its queue's
    /// directory prefix changed or drained).
    DirectoryHashed {
        /// Directory that was completed.
        directory: PathBuf,
        /// Total bytes hashed in that directory.
        size: u64,
        /// Total wall-clock time spent on that directory.
        elapsed: Duration,
    },
    /// A worker's queue drained and it has nothing left to do.
    HasherFinished {
        /// The worker's id.
        worker_id: u32,
    },
    /// The maintenance sweep started.
    MaintenanceStarted,
    /// The maintenance sweep finished with the given report.
    MaintenanceFinished(OptimizeReport),
}
