//! The hash manager: owns the worker pool, applies the device-placement
//! policy, and coordinates pause/resume/stop/shutdown.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

use hashstore_core::{RootValue, TigerTreeBuilder, MIN_BLOCK_SIZE};
use hashstore_db::HashStore;

use crate::config::HashConfig;
use crate::events::HashEvent;
use crate::reader::{default_buffer_size_for, FileReader, ReadMode};
use crate::worker::{WorkItem, Worker};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// A snapshot of one worker's progress, as reported by [`HashManager::get_stats`].
#[derive(Debug, Clone)]
pub struct WorkerStats {
    /// The worker's id.
    pub id: u32,
    /// Bytes left to hash across its queue plus the in-flight file.
    pub bytes_left: i64,
    /// The file currently being hashed, if any.
    pub cur_file: Option<std::path::PathBuf>,
    /// Most recent measured hashing speed.
    pub last_speed: u64,
    /// Whether this particular worker is parked.
    pub is_paused: bool,
}

/// Aggregated pool statistics.
#[derive(Debug, Clone, Default)]
pub struct HasherStats {
    /// Sum of every worker's `bytes_left`.
    pub bytes_left: i64,
    /// Number of files still queued or in flight, across all workers.
    pub files_left: u64,
    /// Sum of every worker's last measured speed.
    pub last_speed: u64,
    /// Per-worker detail.
    pub workers: Vec<WorkerStats>,
    /// True iff every worker is paused.
    pub is_paused: bool,
    /// Count of workers with a non-empty current file.
    pub hashers_running: u32,
}

struct ManagerInner {
    workers: Vec<Worker>,
    pause_depth: u32,
    shutting_down: bool,
}

/// Owns the hasher worker pool and exposes the same operations as the
/// original `HashManager`: enqueue-with-placement, directory-scoped stop,
/// depth-counted pause, graceful shutdown, and a one-shot maintenance run.
pub struct HashManager {
    hcs: RwLock<ManagerInner>,
    config: HashConfig,
    store: Arc<HashStore>,
    events: Sender<HashEvent>,
    queued_files: AtomicU32,
}

impl HashManager {
    /// Construct a manager with no workers. Workers are created lazily by
    /// the placement policy as files are enqueued.
    #[must_use]
    pub fn new(config: HashConfig, store: Arc<HashStore>, events: Sender<HashEvent>) -> Arc<Self> {
        Arc::new(Self {
            hcs: RwLock::new(ManagerInner {
                workers: Vec::new(),
                pause_depth: 0,
                shutting_down: false,
            }),
            config,
            store,
            events,
            queued_files: AtomicU32::new(0),
        })
    }

    /// Ensure `path` (of `size` bytes, living on `device_id`) is queued for
    /// hashing, unless some worker already has it queued. Applies the
    /// device-placement policy described in the hash manager's module
    /// documentation.
    pub fn hash_file(&self, path: &Path, size: i64, device_id: u64) {
        let path_lower = path.to_string_lossy().to_lowercase();
        let mut inner = self.hcs.write();

        if inner
            .workers
            .iter()
            .any(|w| w.has_device(device_id) && w.has_file(&path_lower))
        {
            return;
        }

        let target = Self::place(&inner.workers, &self.config, device_id, size);
        let worker = match target {
            Placement::Existing(index) => index,
            Placement::New => {
                let id = Self::smallest_unused_id(&inner.workers);
                let paused = inner.pause_depth > 0;
                inner
                    .workers
                    .push(Worker::spawn(id, self.config.clone(), self.store.clone(), self.events.clone(), paused));
                inner.workers.len() - 1
            }
        };

        self.queued_files.fetch_add(1, Ordering::Relaxed);
        inner.workers[worker].enqueue(WorkItem {
            path_lower,
            path: path.to_owned(),
            size,
            device_id,
        });
    }

    fn smallest_unused_id(workers: &[Worker]) -> u32 {
        let mut used: Vec<u32> = workers.iter().map(Worker::id).collect();
        used.sort_unstable();
        let mut candidate = 0u32;
        for id in used {
            if id == candidate {
                candidate += 1;
            } else if id > candidate {
                break;
            }
        }
        candidate
    }

    fn place(workers: &[Worker], config: &HashConfig, device_id: u64, size: i64) -> Placement {
        if workers.len() == 1 && !workers[0].has_devices() {
            return Placement::Existing(0);
        }

        if config.hashers_per_volume == 1 {
            if let Some(index) = workers.iter().position(|w| w.has_device(device_id)) {
                return Placement::Existing(index);
            }
            if workers.len() as u32 >= config.max_hashing_threads {
                return Placement::Existing(Self::min_loaded(workers, |_| true));
            }
            return Placement::New;
        }

        // Per-volume cap (`hashers_per_volume == 0` means unlimited per
        // volume; `> 1` means a hard cap).
        let in_volume: Vec<usize> = workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.has_device(device_id))
            .map(|(i, _)| i)
            .collect();

        let cap = config.hashers_per_volume;
        let over_total_cap = workers.len() as u32 >= config.max_hashing_threads;
        let over_volume_cap = cap > 0 && in_volume.len() as u32 >= cap;

        let lightly_loaded_small_file = size <= Self::SMALL_FILE_BYTES
            && !in_volume.is_empty()
            && workers[Self::min_loaded_among(workers, &in_volume)].bytes_left() <= Self::LIGHT_LOAD_BYTES;

        if over_total_cap || over_volume_cap || lightly_loaded_small_file {
            if !in_volume.is_empty() {
                return Placement::Existing(Self::min_loaded_among(workers, &in_volume));
            }
            return Placement::Existing(Self::min_loaded(workers, |_| true));
        }

        Placement::New
    }

    fn min_loaded(workers: &[Worker], predicate: impl Fn(&Worker) -> bool) -> usize {
        workers
            .iter()
            .enumerate()
            .filter(|(_, w)| predicate(w))
            .min_by_key(|(_, w)| w.bytes_left())
            .map(|(i, _)| i)
            .expect("at least one worker to choose from")
    }

    fn min_loaded_among(workers: &[Worker], indices: &[usize]) -> usize {
        *indices
            .iter()
            .min_by_key(|&&i| workers[i].bytes_left())
            .expect("non-empty candidate set")
    }

    /// File-size threshold below which the small-file placement heuristic
    /// applies (10 MiB).
    pub const SMALL_FILE_BYTES: i64 = 10 * 1024 * 1024;
    /// `bytes_left` threshold below which a worker is considered lightly
    /// loaded for the small-file heuristic (200 MiB).
    pub const LIGHT_LOAD_BYTES: i64 = 200 * 1024 * 1024;

    /// Ask every worker to drop queued items under `base_path`
    /// (case-insensitive). Does not interrupt an in-flight file.
    pub fn stop_hashing(&self, base_path: &Path) {
        let prefix = base_path.to_string_lossy().to_lowercase();
        let inner = self.hcs.read();
        for worker in &inner.workers {
            let dropped = worker.drop_path_prefix(&prefix);
            if dropped > 0 {
                self.queued_files.fetch_sub(dropped, Ordering::Relaxed);
            }
        }
    }

    /// Increment the pause depth; on the 0→1 transition, park every
    /// existing worker. Returns a guard that resumes on drop.
    #[must_use]
    pub fn pause_hashing(self: &Arc<Self>) -> PauseGuard {
        let mut inner = self.hcs.write();
        inner.pause_depth += 1;
        if inner.pause_depth == 1 {
            for worker in &inner.workers {
                worker.pause();
            }
        }
        PauseGuard { manager: self.clone() }
    }

    fn resume_hashing_inner(&self) {
        let mut inner = self.hcs.write();
        if inner.pause_depth > 0 {
            inner.pause_depth -= 1;
        }
        if inner.pause_depth == 0 {
            for worker in &inner.workers {
                worker.resume();
            }
        }
    }

    /// Force the pause depth to zero and resume every worker, regardless
    /// of how many overlapping scopes are outstanding.
    pub fn resume_hashing_forced(&self) {
        let mut inner = self.hcs.write();
        inner.pause_depth = 0;
        for worker in &inner.workers {
            worker.resume();
        }
    }

    /// Shut every worker down, busy-waiting until each has drained and
    /// exited. After this call the manager has no workers left.
    pub fn shutdown(&self) {
        let mut inner = self.hcs.write();
        inner.shutting_down = true;
        let workers = std::mem::take(&mut inner.workers);
        drop(inner);

        for worker in workers {
            worker.shutdown_and_join();
            thread::sleep(SHUTDOWN_POLL.min(Duration::from_millis(1)));
        }
    }

    /// Hash a single file synchronously on the calling thread, bypassing
    /// the worker pool entirely. Used by callers that need a TTH
    /// immediately rather than via the async pipeline.
    pub fn hash_file_sync(path: &Path) -> Result<RootValue, crate::error::FileError> {
        let metadata = std::fs::metadata(path).map_err(|source| crate::error::FileError::Open {
            path: path.to_owned(),
            source,
        })?;
        let block_size = hashstore_core::TigerTree::calc_block_size(
            i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            10,
        )
        .max(MIN_BLOCK_SIZE);
        let buffer_size = default_buffer_size_for(block_size);

        let mut builder = TigerTreeBuilder::new(block_size);
        FileReader::read(path, ReadMode::Sync, buffer_size, |chunk| {
            builder.update(chunk);
            true
        })?;
        Ok(builder.finalize().root())
    }

    /// Spawn a detached maintenance thread that runs one optimize pass
    /// and emits `MaintenanceStarted`/`MaintenanceFinished`.
    pub fn start_maintenance(
        self: &Arc<Self>,
        verify: bool,
        share: Arc<dyn hashstore_db::ShareOracle>,
        queue: Arc<dyn hashstore_db::QueueOracle>,
    ) {
        let manager = self.clone();
        thread::Builder::new()
            .name("hash-maintenance".into())
            .spawn(move || {
                let _ = manager.events.send(HashEvent::MaintenanceStarted);
                match manager.store.optimize(verify, share.as_ref(), queue.as_ref()) {
                    Ok(report) => {
                        let _ = manager.events.send(HashEvent::MaintenanceFinished(report));
                    }
                    Err(err) => {
                        tracing::warn!(%err, "maintenance sweep failed");
                    }
                }
            })
            .expect("spawn maintenance thread");
    }

    /// Aggregate per-worker statistics under the shared read lock.
    #[must_use]
    pub fn get_stats(&self) -> HasherStats {
        let inner = self.hcs.read();
        let mut stats = HasherStats {
            is_paused: !inner.workers.is_empty(),
            ..HasherStats::default()
        };

        for worker in &inner.workers {
            let cur_file = worker.current_file();
            if cur_file.is_some() {
                stats.hashers_running += 1;
            }
            if !worker.is_paused() {
                stats.is_paused = false;
            }
            stats.bytes_left += worker.bytes_left();
            stats.last_speed += worker.last_speed();
            stats.workers.push(WorkerStats {
                id: worker.id(),
                bytes_left: worker.bytes_left(),
                cur_file,
                last_speed: worker.last_speed(),
                is_paused: worker.is_paused(),
            });
        }

        stats.files_left = u64::from(self.queued_files.load(Ordering::Relaxed));
        stats
    }
}

enum Placement {
    Existing(usize),
    New,
}

/// RAII guard returned by [`HashManager::pause_hashing`]; resumes the pool
/// (decrementing the pause depth) on drop.
pub struct PauseGuard {
    manager: Arc<HashManager>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.manager.resume_hashing_inner();
    }
}
