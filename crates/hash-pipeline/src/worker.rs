//! A single hasher worker: an OS thread owning a sorted deque of pending
//! files for one or more storage devices.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

use hashstore_core::{Crc32Filter, DirSfvReader, TigerTree, TigerTreeBuilder, MIN_BLOCK_SIZE};
use hashstore_db::{HashStore, HashedFile};

use crate::config::HashConfig;
use crate::error::FileError;
use crate::events::HashEvent;
use crate::reader::{default_buffer_size_for, FileReader, ReadMode};

/// A file queued for hashing on a particular worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Lowercased path, used for ordering and dedup.
    pub path_lower: String,
    /// Real on-disk path.
    pub path: PathBuf,
    /// Size at the time it was queued.
    pub size: i64,
    /// Opaque id of the filesystem/device backing `path`.
    pub device_id: u64,
}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path_lower.cmp(&other.path_lower)
    }
}

struct Inner {
    queue: VecDeque<WorkItem>,
    devices: HashMap<u64, u32>,
    paused: bool,
    stopping: bool,
    shutting_down: bool,
    current_file: Option<PathBuf>,
}

struct Shared {
    inner: Mutex<Inner>,
    condvar: Condvar,
    bytes_left: AtomicU64,
    last_speed: AtomicU64,
}

/// A handle to a running hasher worker: the OS thread plus the state it
/// shares with the manager.
pub struct Worker {
    id: u32,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker thread, blocking immediately on its queue until the
    /// first item is enqueued.
    pub fn spawn(
        id: u32,
        config: HashConfig,
        store: Arc<HashStore>,
        events: Sender<HashEvent>,
        start_paused: bool,
    ) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                devices: HashMap::new(),
                paused: start_paused,
                stopping: false,
                shutting_down: false,
                current_file: None,
            }),
            condvar: Condvar::new(),
            bytes_left: AtomicU64::new(0),
            last_speed: AtomicU64::new(0),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("hasher-{id}"))
            .spawn(move || run(id, thread_shared, config, store, events))
            .expect("spawn hasher thread");

        Self {
            id,
            shared,
            handle: Some(handle),
        }
    }

    /// This worker's id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether any queued item belongs to `device_id`.
    #[must_use]
    pub fn has_device(&self, device_id: u64) -> bool {
        self.shared.inner.lock().devices.contains_key(&device_id)
    }

    /// Whether this worker has at least one queued device (i.e. is not
    /// cold/idle).
    #[must_use]
    pub fn has_devices(&self) -> bool {
        !self.shared.inner.lock().devices.is_empty()
    }

    /// Whether `path_lower` is already queued on this worker.
    #[must_use]
    pub fn has_file(&self, path_lower: &str) -> bool {
        let inner = self.shared.inner.lock();
        inner.queue.iter().any(|item| item.path_lower == path_lower)
            || inner.current_file.as_deref().map(|p| p.to_string_lossy().to_lowercase()) == Some(path_lower.to_owned())
    }

    /// Sum of sizes of queued items plus the unprocessed remainder of the
    /// file currently being hashed.
    #[must_use]
    pub fn bytes_left(&self) -> i64 {
        self.shared.bytes_left.load(Ordering::Relaxed) as i64
    }

    /// The worker's most recently measured hashing speed, bytes/sec.
    #[must_use]
    pub fn last_speed(&self) -> u64 {
        self.shared.last_speed.load(Ordering::Relaxed)
    }

    /// The file currently being hashed, if any.
    #[must_use]
    pub fn current_file(&self) -> Option<PathBuf> {
        self.shared.inner.lock().current_file.clone()
    }

    /// Whether this worker is currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.inner.lock().paused
    }

    /// Queue a new file, in sorted order by lowercased path.
    pub fn enqueue(&self, item: WorkItem) {
        let mut inner = self.shared.inner.lock();
        self.shared
            .bytes_left
            .fetch_add(item.size.max(0) as u64, Ordering::Relaxed);
        *inner.devices.entry(item.device_id).or_insert(0) += 1;
        let pos = inner.queue.partition_point(|existing| existing.path_lower < item.path_lower);
        inner.queue.insert(pos, item);
        drop(inner);
        self.shared.condvar.notify_all();
    }

    /// Drop every queued item whose lowercased path starts with `prefix`,
    /// decrementing device counts accordingly. The currently running file
    /// is left untouched. Returns the number of items dropped.
    pub fn drop_path_prefix(&self, prefix_lower: &str) -> u32 {
        let mut inner = self.shared.inner.lock();
        let mut dropped = 0u32;
        let mut freed_bytes = 0u64;

        inner.queue.retain(|item| {
            if item.path_lower.starts_with(prefix_lower) {
                dropped += 1;
                freed_bytes += item.size.max(0) as u64;
                if let Some(count) = inner.devices.get_mut(&item.device_id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        inner.devices.remove(&item.device_id);
                    }
                }
                false
            } else {
                true
            }
        });

        self.shared.bytes_left.fetch_sub(freed_bytes, Ordering::Relaxed);
        dropped
    }

    /// Park the worker between files. Does not interrupt an in-flight
    /// hash — it takes effect the next time the loop checks.
    pub fn pause(&self) {
        self.shared.inner.lock().paused = true;
        self.shared.condvar.notify_all();
    }

    /// Unpark a paused worker.
    pub fn resume(&self) {
        self.shared.inner.lock().paused = false;
        self.shared.condvar.notify_all();
    }

    /// Ask the worker to drop its remaining queue. If `shutdown` is also
    /// requested the worker exits after draining; otherwise it resumes
    /// normal operation on the next loop iteration.
    fn signal_stop(&self, shutdown: bool) {
        let mut inner = self.shared.inner.lock();
        inner.stopping = true;
        if shutdown {
            inner.shutting_down = true;
        }
        drop(inner);
        self.shared.condvar.notify_all();
    }

    /// Request shutdown and block until the worker thread exits.
    pub fn shutdown_and_join(mut self) {
        self.signal_stop(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.signal_stop(true);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

enum NextItem {
    Item(WorkItem),
    ShutDown,
}

fn next_item(shared: &Shared) -> NextItem {
    let mut inner = shared.inner.lock();
    loop {
        if inner.paused {
            shared.condvar.wait(&mut inner);
            continue;
        }

        if inner.stopping {
            if inner.shutting_down {
                return NextItem::ShutDown;
            }
            inner.stopping = false;
            continue;
        }

        if let Some(item) = inner.queue.pop_front() {
            if let Some(count) = inner.devices.get_mut(&item.device_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.devices.remove(&item.device_id);
                }
            }
            inner.current_file = Some(item.path.clone());
            return NextItem::Item(item);
        }

        if inner.shutting_down {
            return NextItem::ShutDown;
        }

        shared.condvar.wait(&mut inner);
    }
}

fn is_stopping(shared: &Shared) -> bool {
    shared.inner.lock().stopping
}

fn run(
    worker_id: u32,
    shared: Arc<Shared>,
    config: HashConfig,
    store: Arc<HashStore>,
    events: Sender<HashEvent>,
) {
    let mut sfv = DirSfvReader::new();
    let mut current_dir: Option<PathBuf> = None;
    let mut dir_bytes: u64 = 0;
    let mut dir_start = Instant::now();

    loop {
        let item = match next_item(&shared) {
            NextItem::Item(item) => item,
            NextItem::ShutDown => break,
        };

        let dir = item.path.parent().map(Path::to_path_buf);
        if dir != current_dir {
            if let Some(prev_dir) = current_dir.take() {
                let _ = events.send(HashEvent::DirectoryHashed {
                    directory: prev_dir,
                    size: dir_bytes,
                    elapsed: dir_start.elapsed(),
                });
            }
            if let Some(d) = &dir {
                sfv.load_path(d);
            }
            current_dir = dir;
            dir_bytes = 0;
            dir_start = Instant::now();
        }

        let outcome = hash_one(&item, &config, &sfv, &shared);
        {
            let mut inner = shared.inner.lock();
            inner.current_file = None;
        }

        match outcome {
            Ok(Some((tree, speed, mtime))) => {
                shared.last_speed.store(speed, Ordering::Relaxed);
                let hashed = HashedFile {
                    root: tree.root(),
                    mtime,
                    size: item.size,
                };
                if let Err(err) = store.add_hashed_file(&item.path_lower, &tree, hashed) {
                    tracing::warn!(path = %item.path.display(), %err, "failed to persist hashed file");
                } else {
                    if config.log_hashing {
                        tracing::info!(path = %item.path.display(), root = %tree.root(), "hashing complete");
                    }
                    let _ = events.send(HashEvent::FileHashed {
                        path: item.path.clone(),
                        root: tree.root(),
                        speed_bytes_per_sec: speed,
                    });
                    dir_bytes += item.size.max(0) as u64;
                }
            }
            Ok(None) => {
                // Cancelled mid-hash: swallowed silently, per the
                // worker loop's `if !stopping` guard.
            }
            Err(err) => {
                let _ = events.send(HashEvent::FileFailed {
                    path: item.path.clone(),
                    reason: err.to_string(),
                });
            }
        }

        shared
            .bytes_left
            .fetch_sub(item.size.max(0) as u64, Ordering::Relaxed);
    }

    if let Some(dir) = current_dir.take() {
        let _ = events.send(HashEvent::DirectoryHashed {
            directory: dir,
            size: dir_bytes,
            elapsed: dir_start.elapsed(),
        });
    }
    let _ = events.send(HashEvent::HasherFinished { worker_id });
}

fn hash_one(
    item: &WorkItem,
    config: &HashConfig,
    sfv: &DirSfvReader,
    shared: &Shared,
) -> Result<Option<(TigerTree, u64, u64)>, FileError> {
    let metadata = std::fs::metadata(&item.path).map_err(|source| FileError::Open {
        path: item.path.clone(),
        source,
    })?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .ok_or_else(|| FileError::InvalidModificationTime(item.path.clone()))?;

    let file_size = i64::try_from(metadata.len()).unwrap_or(item.size);
    let block_size = TigerTree::calc_block_size(file_size, 10).max(MIN_BLOCK_SIZE);
    let buffer_size = default_buffer_size_for(block_size);

    let basename_lower = item
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let expected_crc = sfv.has_file(&basename_lower);

    let mut builder = TigerTreeBuilder::new(block_size);
    let mut crc = expected_crc.map(|_| Crc32Filter::new());
    let throttle_bytes_per_sec = u64::from(config.max_hash_speed_mib) * 1024 * 1024;

    let start = Instant::now();
    let mut processed: u64 = 0;
    let mut cancelled = false;

    FileReader::read(&item.path, ReadMode::Async, buffer_size, |chunk| {
        if throttle_bytes_per_sec > 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let allowed = (throttle_bytes_per_sec as f64 * elapsed) as u64;
            if processed > allowed {
                let over = processed - allowed;
                let sleep_secs = over as f64 / throttle_bytes_per_sec as f64;
                thread::sleep(Duration::from_secs_f64(sleep_secs));
            }
        }

        builder.update(chunk);
        if let Some(c) = crc.as_mut() {
            c.update(chunk);
        }
        processed += chunk.len() as u64;

        if is_stopping(shared) {
            cancelled = true;
            false
        } else {
            true
        }
    })?;

    if cancelled {
        return Ok(None);
    }

    let tree = builder.finalize();

    if let (Some(expected), Some(crc)) = (expected_crc, crc) {
        let actual = crc.finalize();
        if actual != expected {
            return Err(FileError::CrcMismatch {
                path: item.path.clone(),
                expected,
                actual,
            });
        }
    }

    let elapsed = start.elapsed().as_secs_f64().max(0.000_1);
    let speed = (file_size as f64 / elapsed) as u64;
    Ok(Some((tree, speed, mtime)))
}
