//! Block-aligned streaming file reads, with an optional double-buffered
//! variant that overlaps I/O with the caller's processing of the
//! previous chunk.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread;

use crate::error::FileError;

/// Default chunk size for [`ReadMode::Sync`]; overridden by callers that
/// want the buffer aligned to a Tiger-tree block size instead.
pub const DEFAULT_BUFFER_SIZE: usize = 65536;

/// How [`FileReader::read`] pulls bytes off disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Read and process one buffer at a time on the caller's thread.
    Sync,
    /// Read the next buffer on a helper thread while the caller processes
    /// the current one, hiding I/O latency on slow media.
    Async,
}

/// Stateless streaming reader. The callback returns whether to continue;
/// returning `false` aborts the read cleanly (used for cancellation) and
/// is not an error.
pub struct FileReader;

impl FileReader {
    /// Stream `path` in chunks of `buffer_size` bytes, invoking `on_chunk`
    /// for each one.
    pub fn read(
        path: &Path,
        mode: ReadMode,
        buffer_size: usize,
        on_chunk: impl FnMut(&[u8]) -> bool,
    ) -> Result<(), FileError> {
        match mode {
            ReadMode::Sync => Self::read_sync(path, buffer_size, on_chunk),
            ReadMode::Async => Self::read_async(path, buffer_size, on_chunk),
        }
    }

    fn read_sync(
        path: &Path,
        buffer_size: usize,
        mut on_chunk: impl FnMut(&[u8]) -> bool,
    ) -> Result<(), FileError> {
        let mut file = File::open(path).map_err(|source| FileError::Open {
            path: path.to_owned(),
            source,
        })?;

        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = file.read(&mut buf).map_err(|source| FileError::Read {
                path: path.to_owned(),
                source,
            })?;
            if n == 0 {
                return Ok(());
            }
            if !on_chunk(&buf[..n]) {
                return Ok(());
            }
        }
    }

    fn read_async(
        path: &Path,
        buffer_size: usize,
        mut on_chunk: impl FnMut(&[u8]) -> bool,
    ) -> Result<(), FileError> {
        let (tx, rx) = sync_channel::<Result<Option<Vec<u8>>, std::io::Error>>(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let reader_cancel = cancel.clone();
        let reader_path = path.to_owned();

        let handle = thread::Builder::new()
            .name("hash-file-reader".into())
            .spawn(move || {
                let file = match File::open(&reader_path) {
                    Ok(f) => f,
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        return;
                    }
                };
                let mut file = file;
                let mut buf = vec![0u8; buffer_size];
                loop {
                    if reader_cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    match file.read(&mut buf) {
                        Ok(0) => {
                            let _ = tx.send(Ok(None));
                            return;
                        }
                        Ok(n) => {
                            if tx.send(Ok(Some(buf[..n].to_vec()))).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            let _ = tx.send(Err(err));
                            return;
                        }
                    }
                }
            })
            .expect("spawn file reader thread");

        let mut read_err: Option<std::io::Error> = None;
        while let Ok(message) = rx.recv() {
            match message {
                Ok(Some(chunk)) => {
                    if !on_chunk(&chunk) {
                        cancel.store(true, Ordering::Relaxed);
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    read_err = Some(err);
                    break;
                }
            }
        }

        let _ = handle.join();

        if let Some(source) = read_err {
            return Err(FileError::Read {
                path: path.to_owned(),
                source,
            });
        }
        Ok(())
    }
}

/// Helper retained for call sites that only have a path and want a
/// sensible buffer size without knowing the file's Tiger-tree block size.
#[must_use]
pub fn default_buffer_size_for(block_size: i64) -> usize {
    (block_size as usize).clamp(DEFAULT_BUFFER_SIZE, 4 * 1024 * 1024)
}
