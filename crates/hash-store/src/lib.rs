//! The content-addressed hash store: two persistent key-value tables
//! (FileIndex and HashData) plus the maintenance sweep that keeps orphan
//! records from accumulating.
//!
//! This crate owns the on-disk record format and the store's query
//! surface; it knows nothing about threads, placement policy, or reading
//! files off disk — that's `hashstore-pipeline`.

pub mod error;
pub mod oracle;
pub mod record;
pub mod stat;
pub mod store;

pub use error::{RootInfoKind, StoreError};
pub use oracle::{NullOracles, QueueOracle, ShareOracle};
pub use record::HashedFile;
pub use stat::{FileStat, RealFileStat};
pub use store::{DbStats, HashStore, HashStoreOpenOptions, OptimizeReport};
