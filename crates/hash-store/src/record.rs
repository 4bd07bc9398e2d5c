//! Binary record layout for the FileIndex and HashData tables.
//!
//! Both layouts are little-endian and version-prefixed. A version byte
//! greater than [`CURRENT_VERSION`] is a soft failure (the record is
//! treated as absent, never as an error) so that a downgrade never
//! corrupts data it doesn't understand.

use byteorder::{ByteOrder, LittleEndian};

use hashstore_core::{CoreError, RootValue, TigerTree, ROOT_BYTES};

/// The only record version this crate writes.
pub const CURRENT_VERSION: u8 = 1;

/// A denormalized pointer from a FileIndex key into HashData: what a
/// lowercased path currently maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashedFile {
    /// The file's content address.
    pub root: RootValue,
    /// Modification time, seconds since epoch.
    pub mtime: u64,
    /// File size in bytes.
    pub size: i64,
}

/// Byte length of an encoded FileIndex value: `1 + 8 + 24 + 8`.
pub const FILE_INDEX_RECORD_LEN: usize = 1 + 8 + ROOT_BYTES + 8;

/// Serialize a [`HashedFile`] into the fixed 41-byte FileIndex layout.
#[must_use]
pub fn encode_file_index(file: &HashedFile) -> [u8; FILE_INDEX_RECORD_LEN] {
    let mut buf = [0u8; FILE_INDEX_RECORD_LEN];
    buf[0] = CURRENT_VERSION;
    LittleEndian::write_u64(&mut buf[1..9], file.mtime);
    buf[9..9 + ROOT_BYTES].copy_from_slice(file.root.as_bytes());
    LittleEndian::write_i64(&mut buf[9 + ROOT_BYTES..], file.size);
    buf
}

/// Result of decoding a record whose version byte exceeds what this build
/// understands: callers must treat it exactly like "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionTooNew(pub u8);

/// Deserialize a FileIndex value. Returns `Ok(None)` for a record written
/// by a newer version of this format (soft-fail); `Err` only for a buffer
/// that is the wrong length outright (truncated/corrupt).
pub fn decode_file_index(bytes: &[u8]) -> Result<Option<HashedFile>, DecodeError> {
    if bytes.len() != FILE_INDEX_RECORD_LEN {
        return Err(DecodeError::WrongLength {
            expected: FILE_INDEX_RECORD_LEN,
            actual: bytes.len(),
        });
    }

    let version = bytes[0];
    if version > CURRENT_VERSION {
        return Ok(None);
    }

    let mtime = LittleEndian::read_u64(&bytes[1..9]);
    let mut root_bytes = [0u8; ROOT_BYTES];
    root_bytes.copy_from_slice(&bytes[9..9 + ROOT_BYTES]);
    let size = LittleEndian::read_i64(&bytes[9 + ROOT_BYTES..]);

    Ok(Some(HashedFile {
        root: RootValue::new(root_bytes),
        mtime,
        size,
    }))
}

/// Serialize a [`TigerTree`] into the HashData layout: `version ‖
/// fileSize ‖ blockSize ‖ leaves`. Single-leaf trees are written with a
/// zero-length leaf section by convention.
#[must_use]
pub fn encode_hash_data(tree: &TigerTree) -> Vec<u8> {
    let leaves = tree.leaves();
    let leaf_section_len = if leaves.len() == 1 { 0 } else { leaves.len() };

    let mut buf = Vec::with_capacity(17 + leaf_section_len * ROOT_BYTES);
    buf.push(CURRENT_VERSION);
    buf.extend_from_slice(&tree.file_size().to_le_bytes());
    buf.extend_from_slice(&tree.block_size().to_le_bytes());
    if leaf_section_len > 0 {
        for leaf in leaves {
            buf.extend_from_slice(leaf.as_bytes());
        }
    }
    buf
}

/// Deserialize a HashData value into a reconstructed [`TigerTree`],
/// recomputing its root from the leaves (or taking the stored root
/// directly, in the single-leaf case where no leaf bytes were persisted).
///
/// `Ok(None)` for a too-new version (soft-fail); `Err` for a truncated or
/// misaligned buffer (the leaf section length must be a multiple of
/// [`ROOT_BYTES`]).
pub fn decode_hash_data(key_root: RootValue, bytes: &[u8]) -> Result<Option<TigerTree>, DecodeError> {
    const HEADER_LEN: usize = 1 + 8 + 8;
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::WrongLength {
            expected: HEADER_LEN,
            actual: bytes.len(),
        });
    }

    let version = bytes[0];
    if version > CURRENT_VERSION {
        return Ok(None);
    }

    let file_size = LittleEndian::read_i64(&bytes[1..9]);
    let block_size = LittleEndian::read_i64(&bytes[9..17]);
    let leaf_bytes = &bytes[17..];

    if leaf_bytes.is_empty() {
        return Ok(Some(TigerTree::single_leaf(file_size, block_size, key_root)));
    }

    let leaves = TigerTree::decode_leaves(leaf_bytes)?;

    Ok(Some(TigerTree::from_leaves(file_size, block_size, leaves)))
}

/// Decoding failures caused by a malformed buffer, as opposed to the
/// soft-fail "version too new" path.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A fixed-length record (FileIndex) had the wrong byte count.
    #[error("record has wrong length: expected {expected}, got {actual}")]
    WrongLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length observed.
        actual: usize,
    },

    /// A HashData leaf section's length was not a multiple of `ROOT_BYTES`.
    #[error("malformed tree data: {0}")]
    MalformedTree(#[from] CoreError),
}
