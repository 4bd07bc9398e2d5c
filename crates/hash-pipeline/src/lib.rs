//! The hashing pipeline: configuration, file reading, per-worker hashing
//! threads, and the manager that places work and aggregates stats.
//!
//! This crate has no knowledge of how files are discovered (that's a
//! share-scan or queue subsystem's job) — callers hand it a path, size and
//! device id and it takes care of the rest, persisting results through
//! [`hashstore_db::HashStore`].

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod reader;
pub mod worker;

pub use config::HashConfig;
pub use error::{ConfigError, FileError};
pub use events::HashEvent;
pub use manager::{HashManager, HasherStats, PauseGuard, WorkerStats};
pub use reader::{FileReader, ReadMode};
pub use worker::{WorkItem, Worker};
