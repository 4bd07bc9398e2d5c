//! Platform-abstracted file stat, used by `rename_file` to validate the
//! destination without depending on any particular mtime representation.

use std::path::Path;
use std::time::UNIX_EPOCH;

/// `(size, mtime)` abstracted away from platform-specific APIs, so the
/// store's rename logic never touches `std::fs` directly. `None` stands
/// for "doesn't exist or can't be read".
pub trait FileStat: Send + Sync {
    /// Stat `path`, returning `None` if it doesn't exist or can't be read.
    fn stat(&self, path: &Path) -> Option<(i64, u64)>;
}

/// The real filesystem, used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileStat;

impl FileStat for RealFileStat {
    fn stat(&self, path: &Path) -> Option<(i64, u64)> {
        let meta = std::fs::metadata(path).ok()?;
        let size = i64::try_from(meta.len()).ok()?;
        let mtime = meta
            .modified()
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_secs();
        Some((size, mtime))
    }
}
