//! A durable, ordered key-value table over `redb`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::KvError;
use crate::retry::with_retry;

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("main");

/// Options controlling how a [`DbHandle`] opens its backing file.
///
/// `compress` and `cache_size_bytes` have no effect on `redb` (it manages
/// its own page cache and does not support pluggable block compression);
/// they are kept so callers can still express the FileIndex-vs-HashData
/// tuning distinction, and so a future engine swap doesn't need an API
/// change.
#[derive(Debug, Clone)]
pub struct DbOpenOptions {
    /// Human-readable name used in log lines and error messages.
    pub friendly_name: String,
    /// Unused under `redb`; see struct docs.
    pub compress: bool,
    /// Unused under `redb`; see struct docs.
    pub cache_size_bytes: u64,
    /// If a repair flag is present, abort instead of attempting recovery.
    pub abort_on_repair: bool,
}

impl DbOpenOptions {
    /// Reasonable defaults for a new table: no compression setting, a
    /// modest cache hint, repairs allowed.
    #[must_use]
    pub fn new(friendly_name: impl Into<String>) -> Self {
        Self {
            friendly_name: friendly_name.into(),
            compress: false,
            cache_size_bytes: 64 * 1024 * 1024,
            abort_on_repair: false,
        }
    }
}

/// A single ordered key-value table, durable across restarts.
///
/// Wraps one `redb::Database` behind a lock: reads and writes only need
/// shared access to the engine, but `compact` needs exclusive access, so
/// everything goes through the same `Mutex` to keep the locking story
/// simple and the API free of `unsafe`.
pub struct DbHandle {
    db: Mutex<Database>,
    path: PathBuf,
    friendly_name: String,
    last_size: AtomicI64,
}

impl DbHandle {
    /// Open (creating if necessary) a database file at `path`.
    ///
    /// If a `<path>.REPAIR` flag file is present from a prior run, this
    /// either aborts (`abort_on_repair`) or consumes the flag and opens
    /// normally, trusting `redb`'s own MVCC recovery on open to stand in
    /// for the explicit repair pass the original engine ran here.
    pub fn open(path: impl Into<PathBuf>, opts: DbOpenOptions) -> Result<Self, KvError> {
        let path = path.into();
        let repair_flag = repair_flag_path(&path);

        if repair_flag.exists() {
            if opts.abort_on_repair {
                return Err(KvError::AbortOnOpen { path });
            }
            tracing::warn!(db = %opts.friendly_name, path = %path.display(), "repair flag present, recovering on open");
            std::fs::remove_file(&repair_flag).ok();
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(|source| KvError::Corruption {
            path: path.clone(),
            source,
        })?;

        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(TABLE)?;
            write_txn.commit()?;
        }

        Ok(Self {
            db: Mutex::new(db),
            path,
            friendly_name: opts.friendly_name,
            last_size: AtomicI64::new(-1),
        })
    }

    /// Insert or overwrite a value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        with_retry("put", || {
            let db = self.db.lock();
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(TABLE)?;
                table.insert(key, value)?;
            }
            txn.commit()?;
            Ok(())
        })?;
        self.last_size.store(-1, Ordering::Relaxed);
        Ok(())
    }

    /// Fetch a value by key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        with_retry("get", || {
            let db = self.db.lock();
            let txn = db.begin_read()?;
            let table = txn.open_table(TABLE)?;
            Ok(table.get(key)?.map(|v| v.value().to_vec()))
        })
    }

    /// Check key existence without paying for a full value copy.
    pub fn has(&self, key: &[u8]) -> Result<bool, KvError> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove a key. Removing a key that doesn't exist is not an error.
    pub fn remove(&self, key: &[u8]) -> Result<(), KvError> {
        with_retry("remove", || {
            let db = self.db.lock();
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(TABLE)?;
                table.remove(key)?;
            }
            txn.commit()?;
            Ok(())
        })?;
        self.last_size.store(-1, Ordering::Relaxed);
        Ok(())
    }

    /// Pin a consistent view of the table. Held independently of `self`'s
    /// lock — callers may take a snapshot from each of several `DbHandle`s
    /// up front and sweep all of them afterward, with the guarantee that
    /// none of the sweeps observe writes committed after any snapshot was
    /// taken (the §4.E maintenance sweep's multi-table isolation
    /// requirement; see `hashstore_db::HashStore::optimize`).
    pub fn snapshot(&self) -> Result<DbSnapshot, KvError> {
        let db = self.db.lock();
        let txn = db.begin_read()?;
        Ok(DbSnapshot { txn })
    }

    /// Snapshot-isolated removal sweep: every entry for which `predicate`
    /// returns `true` is staged for deletion, evaluated against `snapshot`
    /// rather than the table's current state, then deleted in one write
    /// transaction so concurrent writers can't observe a
    /// partially-applied sweep.
    pub fn remove_if(
        &self,
        snapshot: &DbSnapshot,
        mut predicate: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<u64, KvError> {
        let doomed: Vec<Vec<u8>> = {
            let table = snapshot.txn.open_table(TABLE)?;
            let mut doomed = Vec::new();
            for entry in table.iter()? {
                let (k, v) = entry?;
                if predicate(k.value(), v.value()) {
                    doomed.push(k.value().to_vec());
                }
            }
            doomed
        };

        if doomed.is_empty() {
            return Ok(0);
        }

        let db = self.db.lock();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE)?;
            for key in &doomed {
                table.remove(key.as_slice())?;
            }
        }
        write_txn.commit()?;
        self.last_size.store(-1, Ordering::Relaxed);
        Ok(doomed.len() as u64)
    }

    /// Iterate every `(key, value)` pair against a consistent snapshot.
    pub fn for_each(&self, mut f: impl FnMut(&[u8], &[u8])) -> Result<(), KvError> {
        let db = self.db.lock();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        for entry in table.iter()? {
            let (k, v) = entry?;
            f(k.value(), v.value());
        }
        Ok(())
    }

    /// Entry count. Cheap after the first call unless `thorough` forces a
    /// fresh count, or a mutation has invalidated the cached value.
    pub fn size(&self, thorough: bool) -> Result<u64, KvError> {
        let cached = self.last_size.load(Ordering::Relaxed);
        if !thorough && cached >= 0 {
            return Ok(cached as u64);
        }

        let db = self.db.lock();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let count = table.len()?;
        self.last_size.store(count as i64, Ordering::Relaxed);
        Ok(count)
    }

    /// Reclaim space freed by deletions. `redb`'s free-list merges lazily;
    /// this forces an eager compaction pass, mirroring the manual
    /// compaction the original engine ran to work around its own
    /// startup-only partial compaction.
    pub fn compact(&self) -> Result<(), KvError> {
        let mut db = self.db.lock();
        let compacted = db
            .compact()
            .map_err(|err| KvError::Storage(err.to_string()))?;
        tracing::info!(db = %self.friendly_name, compacted, "ran compaction pass");
        Ok(())
    }

    /// On-disk size in bytes.
    pub fn size_on_disk(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// The friendly name this handle was opened with.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An opaque, consistent view of a [`DbHandle`]'s table at the moment
/// [`DbHandle::snapshot`] was called. Held across later `remove_if` calls
/// so a sweep spanning several tables never sees writes committed after
/// any of the snapshots was taken.
pub struct DbSnapshot {
    txn: redb::ReadTransaction,
}

fn repair_flag_path(db_path: &Path) -> PathBuf {
    let mut flag = db_path.as_os_str().to_owned();
    flag.push(".REPAIR");
    PathBuf::from(flag)
}
