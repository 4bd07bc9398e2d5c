//! The two-map hash store: FileIndex (path -> pointer) and HashData
//! (root -> tree), with a maintenance sweep that keeps them in sync.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use hashstore_core::{RootValue, TigerTree};
use hashstore_kv::{DbHandle, DbOpenOptions};

use crate::error::{RootInfoKind, StoreError};
use crate::oracle::{QueueOracle, ShareOracle};
use crate::record::{decode_file_index, decode_hash_data, encode_file_index, encode_hash_data, HashedFile, CURRENT_VERSION};
use crate::stat::{FileStat, RealFileStat};

/// Once the fraction of entries deleted since the last compaction exceeds
/// this ratio, the next `optimize` pass compacts that database.
const COMPACTION_RATIO_THRESHOLD: f64 = 0.05;

/// Where the two engines live and how they're tuned.
#[derive(Debug, Clone)]
pub struct HashStoreOpenOptions {
    /// LRU cache hint forwarded to both engines (see
    /// [`hashstore_kv::DbOpenOptions`] for why this is currently a no-op
    /// under `redb`).
    pub db_cache_size_mib: u64,
    /// Abort rather than auto-repair if a repair flag is present on open.
    pub abort_on_repair: bool,
}

impl Default for HashStoreOpenOptions {
    fn default() -> Self {
        Self {
            db_cache_size_mib: 64,
            abort_on_repair: false,
        }
    }
}

/// Summary of a completed maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// FileIndex entries kept because their path is still shared.
    pub file_valid: u64,
    /// FileIndex entries deleted because their path is no longer shared.
    pub file_unused: u64,
    /// HashData entries kept.
    pub hash_valid: u64,
    /// HashData entries deleted because nothing references them.
    pub hash_unused: u64,
    /// HashData entries deleted because `verify` found them corrupt.
    pub hash_failed: u64,
    /// FileIndex entries deleted in the follow-up orphan pass (their tree
    /// turned out to be missing or corrupt).
    pub orphans_removed: u64,
    /// Total size in bytes of files whose tree must be recomputed as a
    /// result of this sweep.
    pub will_rehash_bytes: i64,
}

/// Per-database diagnostics for the store's two engines.
#[derive(Debug, Clone)]
pub struct DbStats {
    /// "FileIndex" or "HashData".
    pub friendly_name: String,
    /// Entry count (thorough recount).
    pub entry_count: u64,
    /// On-disk file size in bytes.
    pub size_on_disk: u64,
}

/// The content-addressed hash store: owns the FileIndex and HashData
/// engines and exposes the query/mutation surface consumed by the share
/// and queue subsystems.
pub struct HashStore {
    file_db: DbHandle,
    hash_db: DbHandle,
    file_deletions: AtomicU64,
    hash_deletions: AtomicU64,
    stat: Box<dyn FileStat>,
}

impl HashStore {
    /// Open both engines under `base_dir`, in `FileIndex/` and
    /// `HashData/` subdirectories respectively — matching the on-disk
    /// layout other subsystems expect to find alongside the rest of the
    /// client's state.
    pub fn open_at(base_dir: &Path, opts: HashStoreOpenOptions) -> Result<Self, StoreError> {
        let cache_bytes = opts.db_cache_size_mib * 1024 * 1024;

        let file_db = DbHandle::open(
            base_dir.join("FileIndex").join("index.redb"),
            DbOpenOptions {
                friendly_name: "FileIndex".to_owned(),
                compress: true,
                cache_size_bytes: cache_bytes,
                abort_on_repair: opts.abort_on_repair,
            },
        )?;

        let hash_db = DbHandle::open(
            base_dir.join("HashData").join("data.redb"),
            DbOpenOptions {
                friendly_name: "HashData".to_owned(),
                compress: false,
                cache_size_bytes: cache_bytes,
                abort_on_repair: opts.abort_on_repair,
            },
        )?;

        Ok(Self {
            file_db,
            hash_db,
            file_deletions: AtomicU64::new(0),
            hash_deletions: AtomicU64::new(0),
            stat: Box::new(RealFileStat),
        })
    }

    /// Override the file-stat implementation used by [`Self::rename_file`].
    /// Intended for tests.
    #[must_use]
    pub fn with_file_stat(mut self, stat: impl FileStat + 'static) -> Self {
        self.stat = Box::new(stat);
        self
    }

    /// Write the tree, then the file record — in that order, per the
    /// crash contract: a crash between the two writes leaves a
    /// recoverable orphan tree, never a file record pointing nowhere.
    pub fn add_hashed_file(
        &self,
        path_lower: &str,
        tree: &TigerTree,
        file: HashedFile,
    ) -> Result<(), StoreError> {
        self.add_tree(tree)?;
        self.add_file(path_lower, file)?;
        Ok(())
    }

    /// Write just the FileIndex half of a hashed-file pair.
    pub fn add_file(&self, path_lower: &str, file: HashedFile) -> Result<(), StoreError> {
        let buf = encode_file_index(&file);
        self.file_db.put(path_lower.as_bytes(), &buf)?;
        Ok(())
    }

    /// Delete a FileIndex entry. Does not touch HashData — orphaned trees
    /// are reclaimed by [`Self::optimize`], not by this call.
    pub fn remove_file(&self, path_lower: &str) -> Result<(), StoreError> {
        self.file_db.remove(path_lower.as_bytes())?;
        Ok(())
    }

    /// Move a FileIndex entry from `old_lower` to `new_lower`, re-statting
    /// `new_path` for the new mtime. Fails if the destination's size
    /// doesn't match what was recorded for the source — a size change
    /// means the content actually differs and must be re-hashed, not
    /// merely renamed.
    ///
    /// Two separate writes, intentionally not atomic: a crash mid-rename
    /// leaves the source removed and the destination absent, which the
    /// next refresh scan reconstructs by re-hashing.
    pub fn rename_file(
        &self,
        old_lower: &str,
        new_path: &Path,
        new_lower: &str,
    ) -> Result<(), StoreError> {
        let old = self
            .get_file_info(old_lower)
            .ok_or_else(|| StoreError::RenameSourceMissing(old_lower.to_owned()))?;

        let (new_size, new_mtime) = self
            .stat
            .stat(new_path)
            .ok_or_else(|| StoreError::RenameDestinationUnreadable(new_lower.to_owned()))?;

        if new_size != old.size {
            return Err(StoreError::RenameSizeMismatch {
                old: old_lower.to_owned(),
                new: new_lower.to_owned(),
                old_size: old.size,
                new_size,
            });
        }

        let updated = HashedFile {
            root: old.root,
            mtime: new_mtime,
            size: old.size,
        };

        self.remove_file(old_lower)?;
        self.add_file(new_lower, updated)?;
        Ok(())
    }

    /// Look up a FileIndex record. Absence and a too-new version both
    /// return `None`; a storage failure is logged and also returns `None`.
    #[must_use]
    pub fn get_file_info(&self, path_lower: &str) -> Option<HashedFile> {
        match self.file_db.get(path_lower.as_bytes()) {
            Ok(Some(bytes)) => match decode_file_index(&bytes) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(path = path_lower, %err, "file index record truncated");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(path = path_lower, %err, "file index lookup failed");
                None
            }
        }
    }

    /// `true` iff a record exists and its mtime and size match what the
    /// caller expects. A mismatch means the file changed since it was
    /// last hashed.
    #[must_use]
    pub fn check_tth(&self, path_lower: &str, expected_mtime: u64, expected_size: i64) -> bool {
        match self.get_file_info(path_lower) {
            Some(file) => file.mtime == expected_mtime && file.size == expected_size,
            None => false,
        }
    }

    /// Write a tree record, keyed by its own root.
    pub fn add_tree(&self, tree: &TigerTree) -> Result<(), StoreError> {
        let buf = encode_hash_data(tree);
        self.hash_db.put(tree.root().as_ref(), &buf)?;
        Ok(())
    }

    /// Load a tree by root, recomputing the Merkle combination of its
    /// leaves and rejecting it as corrupt if that doesn't match the key
    /// it was stored under. Corruption and absence are indistinguishable
    /// to the caller — both return `None` — so that callers uniformly
    /// retry or invalidate rather than branching on failure kind.
    #[must_use]
    pub fn get_tree(&self, root: RootValue) -> Option<TigerTree> {
        let bytes = match self.hash_db.get(root.as_ref()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(%root, %err, "hash data lookup failed");
                return None;
            }
        };

        let tree = match decode_hash_data(root, &bytes) {
            Ok(Some(tree)) => tree,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(%root, %err, "hash data record truncated");
                return None;
            }
        };

        if !tree.verify_root(root) {
            tracing::error!(%root, "hash data corruption: leaves do not combine to their key");
            return None;
        }

        Some(tree)
    }

    /// Existence test that bypasses tree reconstruction and verification.
    /// Unlike [`Self::get_tree`], a storage failure is raised rather than
    /// swallowed.
    pub fn has_tree(&self, root: RootValue) -> Result<bool, StoreError> {
        Ok(self.hash_db.has(root.as_ref())?)
    }

    /// Read just the requested prefix field of a tree record without
    /// reconstructing the whole tree. Returns `None` for an absent record
    /// or a too-new version.
    #[must_use]
    pub fn get_root_info(&self, root: RootValue, kind: RootInfoKind) -> Option<i64> {
        let bytes = self.hash_db.get(root.as_ref()).ok().flatten()?;
        if bytes.len() < 17 || bytes[0] > CURRENT_VERSION {
            return None;
        }
        let offset = match kind {
            RootInfoKind::FileSize => 1,
            RootInfoKind::BlockSize => 9,
        };
        Some(i64::from_le_bytes(bytes[offset..offset + 8].try_into().ok()?))
    }

    /// Run the orphan-pruning / verification / compaction maintenance
    /// sweep. Any storage error aborts the sweep and leaves both engines
    /// untouched by the aborted phase — partial deletes within a single
    /// `remove_if` batch are never applied because the batch commits
    /// atomically or not at all.
    pub fn optimize(
        &self,
        verify: bool,
        share: &dyn ShareOracle,
        queue: &dyn QueueOracle,
    ) -> Result<OptimizeReport, StoreError> {
        let mut report = OptimizeReport::default();
        let mut used_roots: HashSet<RootValue> = HashSet::new();

        // Pin both engines' views up front, before either sweep begins, so
        // a tree or file record committed concurrently partway through the
        // sweep is consistently invisible to both passes rather than
        // visible to only the second — see hashstore_kv::DbHandle::snapshot.
        let file_snapshot = self.file_db.snapshot()?;
        let hash_snapshot = self.hash_db.snapshot()?;

        let file_removed = self.file_db.remove_if(&file_snapshot, |key, value| {
            let path_lower = std::str::from_utf8(key).unwrap_or_default();
            if share.is_path_still_shared(path_lower) {
                if let Ok(Some(file)) = decode_file_index(value) {
                    used_roots.insert(file.root);
                }
                report.file_valid += 1;
                false
            } else {
                report.file_unused += 1;
                true
            }
        })?;
        self.file_deletions.fetch_add(file_removed, Ordering::Relaxed);

        let hash_removed = self.hash_db.remove_if(&hash_snapshot, |key, value| {
            let Ok(root_bytes) = <[u8; hashstore_core::ROOT_BYTES]>::try_from(key) else {
                return true;
            };
            let root = RootValue::new(root_bytes);

            if !used_roots.contains(&root) && !queue.is_queued(root) {
                report.hash_unused += 1;
                return true;
            }

            if verify {
                match decode_hash_data(root, value) {
                    Ok(Some(tree)) if tree.verify_root(root) => {
                        used_roots.remove(&root);
                        report.hash_valid += 1;
                        false
                    }
                    _ => {
                        report.hash_failed += 1;
                        true
                    }
                }
            } else {
                used_roots.remove(&root);
                report.hash_valid += 1;
                false
            }
        })?;
        self.hash_deletions.fetch_add(hash_removed, Ordering::Relaxed);

        if !used_roots.is_empty() {
            let orphan_removed = self.file_db.remove_if(&file_snapshot, |_key, value| {
                match decode_file_index(value) {
                    Ok(Some(file)) if used_roots.contains(&file.root) => {
                        report.will_rehash_bytes += file.size;
                        true
                    }
                    _ => false,
                }
            })?;
            report.orphans_removed += orphan_removed;
            self.file_deletions.fetch_add(orphan_removed, Ordering::Relaxed);
        }

        self.maybe_compact(&self.file_db, &self.file_deletions)?;
        self.maybe_compact(&self.hash_db, &self.hash_deletions)?;

        Ok(report)
    }

    fn maybe_compact(&self, db: &DbHandle, deletions: &AtomicU64) -> Result<(), StoreError> {
        let deleted = deletions.load(Ordering::Relaxed);
        if deleted == 0 {
            return Ok(());
        }
        let remaining = db.size(false)?;
        let ratio = deleted as f64 / (deleted + remaining).max(1) as f64;
        if ratio >= COMPACTION_RATIO_THRESHOLD {
            tracing::info!(db = db.friendly_name(), ratio, "compaction threshold reached");
            db.compact()?;
            deletions.store(0, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Entry count and on-disk size for both engines, for diagnostics UI.
    pub fn get_db_stats(&self) -> Result<Vec<DbStats>, StoreError> {
        Ok(vec![
            DbStats {
                friendly_name: self.file_db.friendly_name().to_owned(),
                entry_count: self.file_db.size(true)?,
                size_on_disk: self.file_db.size_on_disk(),
            },
            DbStats {
                friendly_name: self.hash_db.friendly_name().to_owned(),
                entry_count: self.hash_db.size(true)?,
                size_on_disk: self.hash_db.size_on_disk(),
            },
        ])
    }

    /// On-disk byte sizes of both engines, keyed by friendly name.
    #[must_use]
    pub fn get_db_sizes(&self) -> Vec<(String, u64)> {
        vec![
            (self.file_db.friendly_name().to_owned(), self.file_db.size_on_disk()),
            (self.hash_db.friendly_name().to_owned(), self.hash_db.size_on_disk()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::NullOracles;
    use hashstore_core::{TigerTreeBuilder, MIN_BLOCK_SIZE};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn open_tmp() -> (tempfile::TempDir, HashStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HashStore::open_at(dir.path(), HashStoreOpenOptions::default()).unwrap();
        (dir, store)
    }

    fn sample_tree(byte: u8, len: usize) -> TigerTree {
        let mut b = TigerTreeBuilder::new(MIN_BLOCK_SIZE);
        b.update(&vec![byte; len]);
        b.finalize()
    }

    #[test]
    fn add_hashed_file_round_trips_through_get_file_info_and_get_tree() {
        let (_dir, store) = open_tmp();
        let tree = sample_tree(0x61, 100_000);
        let file = HashedFile { root: tree.root(), mtime: 1000, size: tree.file_size() };

        store.add_hashed_file("a/foo.bin", &tree, file).unwrap();

        let info = store.get_file_info("a/foo.bin").unwrap();
        assert_eq!(info, file);
        assert!(store.has_tree(tree.root()).unwrap());

        let loaded = store.get_tree(tree.root()).unwrap();
        assert_eq!(loaded.root(), tree.root());
        assert_eq!(
            store.get_root_info(tree.root(), RootInfoKind::FileSize),
            Some(100_000)
        );
    }

    #[test]
    fn check_tth_detects_mismatch() {
        let (_dir, store) = open_tmp();
        let tree = sample_tree(0x62, 1000);
        let file = HashedFile { root: tree.root(), mtime: 42, size: 1000 };
        store.add_hashed_file("x", &tree, file).unwrap();

        assert!(store.check_tth("x", 42, 1000));
        assert!(!store.check_tth("x", 43, 1000));
        assert!(!store.check_tth("missing", 42, 1000));
    }

    #[test]
    fn corrupted_tree_is_reported_as_absent() {
        let (_dir, store) = open_tmp();
        let tree = sample_tree(0x63, (MIN_BLOCK_SIZE + 1) as usize);
        store.add_tree(&tree).unwrap();

        // Tamper directly with the stored bytes to flip a leaf.
        let mut bytes = store.hash_db.get(tree.root().as_ref()).unwrap().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        store.hash_db.put(tree.root().as_ref(), &bytes).unwrap();

        assert!(store.get_tree(tree.root()).is_none());
    }

    #[test]
    fn rename_updates_path_keeps_tree() {
        let (_dir, store) = open_tmp();
        let tree = sample_tree(0x64, 2000);
        let file = HashedFile { root: tree.root(), mtime: 10, size: 2000 };
        let store = store.with_file_stat(FixedStat(2000, 99));
        store.add_hashed_file("a/foo.bin", &tree, file).unwrap();

        store
            .rename_file("a/foo.bin", Path::new("/irrelevant/b/bar.bin"), "b/bar.bin")
            .unwrap();

        assert!(store.get_file_info("a/foo.bin").is_none());
        let moved = store.get_file_info("b/bar.bin").unwrap();
        assert_eq!(moved.root, tree.root());
        assert_eq!(moved.mtime, 99);
        assert!(store.get_tree(tree.root()).is_some());
    }

    #[test]
    fn rename_rejects_size_mismatch() {
        let (_dir, store) = open_tmp();
        let tree = sample_tree(0x65, 2000);
        let file = HashedFile { root: tree.root(), mtime: 10, size: 2000 };
        let store = store.with_file_stat(FixedStat(2001, 99));
        store.add_hashed_file("a/foo.bin", &tree, file).unwrap();

        let err = store
            .rename_file("a/foo.bin", Path::new("/irrelevant/b/bar.bin"), "b/bar.bin")
            .unwrap_err();
        assert!(matches!(err, StoreError::RenameSizeMismatch { .. }));
        assert!(store.get_file_info("a/foo.bin").is_some());
    }

    struct FixedStat(i64, u64);
    impl FileStat for FixedStat {
        fn stat(&self, _path: &Path) -> Option<(i64, u64)> {
            Some((self.0, self.1))
        }
    }

    struct MapOracles {
        shared: HashMap<String, bool>,
        queued: Mutex<HashSet<RootValue>>,
    }
    impl ShareOracle for MapOracles {
        fn is_path_still_shared(&self, path_lower: &str) -> bool {
            *self.shared.get(path_lower).unwrap_or(&false)
        }
    }
    impl QueueOracle for MapOracles {
        fn is_queued(&self, root: RootValue) -> bool {
            self.queued.lock().unwrap().contains(&root)
        }
    }

    #[test]
    fn optimize_prunes_unshared_paths_and_orphan_trees() {
        let (_dir, store) = open_tmp();
        let kept_tree = sample_tree(0x66, 3000);
        let dropped_tree = sample_tree(0x67, 4000);

        store
            .add_hashed_file("kept.bin", &kept_tree, HashedFile { root: kept_tree.root(), mtime: 1, size: 3000 })
            .unwrap();
        store
            .add_hashed_file("dropped.bin", &dropped_tree, HashedFile { root: dropped_tree.root(), mtime: 1, size: 4000 })
            .unwrap();

        let oracles = MapOracles {
            shared: HashMap::from([("kept.bin".to_owned(), true)]),
            queued: Mutex::new(HashSet::new()),
        };

        let report = store.optimize(false, &oracles, &oracles).unwrap();
        assert_eq!(report.file_valid, 1);
        assert_eq!(report.file_unused, 1);
        assert_eq!(report.hash_unused, 1);
        assert_eq!(report.hash_valid, 1);

        assert!(store.get_file_info("kept.bin").is_some());
        assert!(store.get_file_info("dropped.bin").is_none());
        assert!(store.get_tree(kept_tree.root()).is_some());
        assert!(store.get_tree(dropped_tree.root()).is_none());
    }

    #[test]
    fn optimize_retains_queued_root_even_when_unshared() {
        let (_dir, store) = open_tmp();
        let tree = sample_tree(0x68, 5000);
        store
            .add_hashed_file("p.bin", &tree, HashedFile { root: tree.root(), mtime: 1, size: 5000 })
            .unwrap();

        let oracles = MapOracles {
            shared: HashMap::new(),
            queued: Mutex::new(HashSet::from([tree.root()])),
        };

        store.optimize(false, &oracles, &oracles).unwrap();
        assert!(store.get_file_info("p.bin").is_none());
        assert!(store.get_tree(tree.root()).is_some());
    }

    #[test]
    fn optimize_is_no_op_on_empty_store() {
        let (_dir, store) = open_tmp();
        let report = store.optimize(true, &NullOracles, &NullOracles).unwrap();
        assert_eq!(report, OptimizeReport::default());
    }
}
