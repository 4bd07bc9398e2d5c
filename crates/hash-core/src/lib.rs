//! Pure hashing primitives: Tiger-tree construction, root encoding, CRC-32
//! filtering and SFV manifest parsing.
//!
//! This crate has no knowledge of persistence, threads, or file placement
//! policy — those live in `hashstore-kv`, `hashstore-db` and
//! `hashstore-pipeline` respectively. Everything here is deterministic,
//! single-threaded, and safe to call from a test without touching a
//! filesystem (except [`sfv::DirSfvReader`], which necessarily does).

pub mod crc32;
pub mod error;
pub mod root;
pub mod sfv;
pub mod tree;

pub use crc32::Crc32Filter;
pub use error::CoreError;
pub use root::{ParseRootError, RootValue, ROOT_BYTES};
pub use sfv::DirSfvReader;
pub use tree::{TigerTree, TigerTreeBuilder, MIN_BLOCK_SIZE};
