//! Tiger-tree (TTH) builder: incremental leaf hashing and Merkle combination.

use digest::Digest;

use crate::error::CoreError;
use crate::root::{RootValue, ROOT_BYTES};

/// Minimum allowed leaf block size (64 KiB). Files at or below this size
/// are single-leaf trees.
pub const MIN_BLOCK_SIZE: i64 = 65536;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn tiger(parts: &[&[u8]]) -> [u8; ROOT_BYTES] {
    let mut hasher = tiger::Tiger::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; ROOT_BYTES];
    out.copy_from_slice(&digest);
    out
}

fn hash_leaf(block: &[u8]) -> RootValue {
    RootValue::new(tiger(&[&[LEAF_PREFIX], block]))
}

fn hash_node(left: &RootValue, right: &RootValue) -> RootValue {
    RootValue::new(tiger(&[&[NODE_PREFIX], left.as_bytes(), right.as_bytes()]))
}

/// Combine a level of hashes into the level above it, promoting an odd
/// trailing node unchanged. Matches the pairwise combination used
/// throughout the codebase's other Merkle structures.
fn combine_level(level: &[RootValue]) -> Vec<RootValue> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    let mut i = 0;
    while i < level.len() {
        if i + 1 < level.len() {
            next.push(hash_node(&level[i], &level[i + 1]));
            i += 2;
        } else {
            next.push(level[i]);
            i += 1;
        }
    }
    next
}

fn combine_to_root(leaves: &[RootValue]) -> RootValue {
    debug_assert!(!leaves.is_empty());
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = combine_level(&level);
    }
    level[0]
}

/// A complete Tiger tree: leaves plus the root they combine to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TigerTree {
    file_size: i64,
    block_size: i64,
    leaves: Vec<RootValue>,
    root: RootValue,
}

impl TigerTree {
    /// Reconstruct a tree from a persisted file size, block size, and leaf
    /// list, recomputing the root. Used by `hash-store` when loading a
    /// `HashData` record — the root is always recomputed, never trusted
    /// from storage (see the corruption-detection contract in
    /// `hash-store::HashStore::get_tree`).
    #[must_use]
    pub fn from_leaves(file_size: i64, block_size: i64, leaves: Vec<RootValue>) -> Self {
        let root = if leaves.len() == 1 {
            leaves[0]
        } else {
            combine_to_root(&leaves)
        };
        Self {
            file_size,
            block_size,
            leaves,
            root,
        }
    }

    /// Reconstruct the degenerate single-leaf case from just the file size,
    /// block size and root (no leaf bytes were stored — the file is small
    /// enough that leaf == root).
    #[must_use]
    pub fn single_leaf(file_size: i64, block_size: i64, root: RootValue) -> Self {
        Self {
            file_size,
            block_size,
            leaves: vec![root],
            root,
        }
    }

    /// File size in bytes this tree was built over.
    #[must_use]
    pub fn file_size(&self) -> i64 {
        self.file_size
    }

    /// Leaf block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> i64 {
        self.block_size
    }

    /// Borrow the leaf hashes.
    #[must_use]
    pub fn leaves(&self) -> &[RootValue] {
        &self.leaves
    }

    /// The tree's root: its content address.
    #[must_use]
    pub fn root(&self) -> RootValue {
        self.root
    }

    /// Recompute the root from the leaves and compare against a candidate.
    /// Used by callers that load a tree from untrusted storage and need to
    /// detect bit-level corruption.
    #[must_use]
    pub fn verify_root(&self, expected: RootValue) -> bool {
        let recomputed = if self.leaves.len() == 1 {
            self.leaves[0]
        } else {
            combine_to_root(&self.leaves)
        };
        recomputed == expected
    }

    /// Decode a flat leaf-hash buffer (as persisted in a `HashData`
    /// record) into `RootValue`s, rejecting a length that isn't a whole
    /// number of [`ROOT_BYTES`]-sized roots.
    pub fn decode_leaves(bytes: &[u8]) -> Result<Vec<RootValue>, CoreError> {
        if bytes.len() % ROOT_BYTES != 0 {
            return Err(CoreError::MalformedTreeData { len: bytes.len() });
        }
        Ok(bytes
            .chunks_exact(ROOT_BYTES)
            .map(|chunk| {
                let mut arr = [0u8; ROOT_BYTES];
                arr.copy_from_slice(chunk);
                RootValue::new(arr)
            })
            .collect())
    }

    /// Choose a power-of-two block size such that the tree has at most
    /// `2^max_levels` leaves, clamped below by [`MIN_BLOCK_SIZE`].
    #[must_use]
    pub fn calc_block_size(file_size: i64, max_levels: u32) -> i64 {
        let max_leaves: i64 = 1i64 << max_levels;
        let mut block_size = MIN_BLOCK_SIZE;
        while file_size / block_size > max_leaves {
            block_size *= 2;
        }
        block_size
    }
}

/// Incrementally builds a [`TigerTree`] from a stream of byte chunks of
/// arbitrary size.
pub struct TigerTreeBuilder {
    block_size: i64,
    pending: Vec<u8>,
    leaves: Vec<RootValue>,
    file_size: i64,
}

impl TigerTreeBuilder {
    /// Start a new builder with the given leaf block size.
    ///
    /// # Panics
    /// Panics if `block_size < MIN_BLOCK_SIZE`.
    #[must_use]
    pub fn new(block_size: i64) -> Self {
        assert!(
            block_size >= MIN_BLOCK_SIZE,
            "block size {block_size} below MIN_BLOCK_SIZE {MIN_BLOCK_SIZE}"
        );
        Self {
            block_size,
            pending: Vec::new(),
            leaves: Vec::new(),
            file_size: 0,
        }
    }

    /// Feed the next chunk of file bytes. Chunks may be any size; leaf
    /// blocks are emitted as soon as a full block has accumulated, and the
    /// block bytes are dropped from memory immediately after hashing.
    pub fn update(&mut self, bytes: &[u8]) {
        self.file_size += bytes.len() as i64;
        self.pending.extend_from_slice(bytes);

        let block_size = self.block_size as usize;
        while self.pending.len() > block_size {
            let block: Vec<u8> = self.pending.drain(..block_size).collect();
            self.leaves.push(hash_leaf(&block));
        }
    }

    /// Hash the trailing partial block (if any) and combine all leaves
    /// into the root. Consumes the builder.
    #[must_use]
    pub fn finalize(mut self) -> TigerTree {
        if !self.pending.is_empty() || self.leaves.is_empty() {
            let leaf = hash_leaf(&self.pending);
            self.leaves.push(leaf);
        }

        let root = if self.leaves.len() == 1 {
            self.leaves[0]
        } else {
            combine_to_root(&self.leaves)
        };

        TigerTree {
            file_size: self.file_size,
            block_size: self.block_size,
            leaves: self.leaves,
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_has_one_leaf() {
        let tree = TigerTreeBuilder::new(MIN_BLOCK_SIZE).finalize();
        assert_eq!(tree.file_size(), 0);
        assert_eq!(tree.leaves().len(), 1);
        assert_eq!(tree.leaves()[0], tree.root());
        assert_eq!(tree.root(), hash_leaf(&[]));
    }

    #[test]
    fn exact_block_size_is_single_leaf() {
        let data = vec![0x61u8; MIN_BLOCK_SIZE as usize];
        let mut b = TigerTreeBuilder::new(MIN_BLOCK_SIZE);
        b.update(&data);
        let tree = b.finalize();
        assert_eq!(tree.leaves().len(), 1);
        assert_eq!(tree.root(), tree.leaves()[0]);
    }

    #[test]
    fn one_byte_over_block_size_makes_two_leaves() {
        let data = vec![0x61u8; (MIN_BLOCK_SIZE + 1) as usize];
        let mut b = TigerTreeBuilder::new(MIN_BLOCK_SIZE);
        b.update(&data);
        let tree = b.finalize();
        assert_eq!(tree.leaves().len(), 2);
        assert_eq!(tree.root(), hash_node(&tree.leaves()[0], &tree.leaves()[1]));
    }

    #[test]
    fn chunking_does_not_change_the_root() {
        let data: Vec<u8> = (0..(3 * MIN_BLOCK_SIZE + 12345)).map(|i| i as u8).collect();

        let mut whole = TigerTreeBuilder::new(MIN_BLOCK_SIZE);
        whole.update(&data);
        let root_whole = whole.finalize().root();

        let mut chunked = TigerTreeBuilder::new(MIN_BLOCK_SIZE);
        for chunk in data.chunks(777) {
            chunked.update(chunk);
        }
        let root_chunked = chunked.finalize().root();

        assert_eq!(root_whole, root_chunked);
    }

    #[test]
    fn from_leaves_recomputes_matching_root() {
        let data = vec![0x61u8; 100_000];
        let mut b = TigerTreeBuilder::new(MIN_BLOCK_SIZE);
        b.update(&data);
        let tree = b.finalize();

        let reconstructed =
            TigerTree::from_leaves(tree.file_size(), tree.block_size(), tree.leaves().to_vec());
        assert_eq!(reconstructed.root(), tree.root());
        assert!(reconstructed.verify_root(tree.root()));
    }

    #[test]
    fn calc_block_size_clamps_to_minimum() {
        assert_eq!(TigerTree::calc_block_size(1024, 10), MIN_BLOCK_SIZE);
    }

    #[test]
    fn calc_block_size_grows_with_file_size() {
        let bs = TigerTree::calc_block_size(MIN_BLOCK_SIZE * 4096, 10);
        assert!(bs > MIN_BLOCK_SIZE);
        assert_eq!(bs % MIN_BLOCK_SIZE, 0);
    }

    #[test]
    fn corrupted_leaf_fails_verification() {
        let data = vec![0x61u8; (MIN_BLOCK_SIZE + 1) as usize];
        let mut b = TigerTreeBuilder::new(MIN_BLOCK_SIZE);
        b.update(&data);
        let tree = b.finalize();

        let mut bad_leaves = tree.leaves().to_vec();
        bad_leaves[0].0[0] ^= 0xFF;
        let corrupted = TigerTree::from_leaves(tree.file_size(), tree.block_size(), bad_leaves);
        assert!(!corrupted.verify_root(tree.root()));
    }
}
