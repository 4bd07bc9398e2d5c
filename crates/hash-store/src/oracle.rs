//! External collaborators consulted during the maintenance sweep.
//!
//! The source of truth for "is this path still shared" and "is this root
//! queued for download" lives outside the hash store (in the share tree
//! and the queue manager respectively); the sweep only needs narrow
//! read-only answers, injected as trait objects at construction.

use hashstore_core::RootValue;

/// Answers whether a FileIndex path is still part of the current share.
pub trait ShareOracle: Send + Sync {
    /// `true` if `path_lower` is still shared and its record should be kept.
    fn is_path_still_shared(&self, path_lower: &str) -> bool;
}

/// Answers whether a root is referenced by something other than a share
/// (e.g. a queued download), and so must survive even if no FileIndex
/// entry currently points at it.
pub trait QueueOracle: Send + Sync {
    /// `true` if `root` is queued and its tree must be retained.
    fn is_queued(&self, root: RootValue) -> bool;
}

/// An oracle pair that keeps nothing: every path is unshared, nothing is
/// queued. Useful for tests and for a store run with no surrounding
/// share/queue subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOracles;

impl ShareOracle for NullOracles {
    fn is_path_still_shared(&self, _path_lower: &str) -> bool {
        false
    }
}

impl QueueOracle for NullOracles {
    fn is_queued(&self, _root: RootValue) -> bool {
        false
    }
}
