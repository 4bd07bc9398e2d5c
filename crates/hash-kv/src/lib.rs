//! A small, durable ordered key-value engine used to persist the hash
//! store's two tables (FileIndex and HashData).
//!
//! Built on `redb` rather than the embedded engine this module's shape was
//! learned from: both are single-writer, MVCC, crash-safe ordered stores,
//! so the retry/compaction/snapshot vocabulary carries over directly.

pub mod error;
pub mod handle;
pub mod retry;

pub use error::KvError;
pub use handle::{DbHandle, DbOpenOptions};
