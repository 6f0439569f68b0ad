// Copyright 2026 Covenant Labs

//! Merkle tree used by [`super::WormLog::seal`] to finalize a prefix of the
//! event chain. Binary, built bottom-up; an odd level
//! duplicates its last leaf, the common construction for append-friendly
//! Merkle trees.

use blake3::Hasher;

/// A 32-byte BLAKE3 digest.
pub type Digest = [u8; 32];

/// Builds a Merkle root over a fixed batch of leaf hashes.
#[derive(Debug, Default)]
pub struct MerkleTree {
    leaves: Vec<Digest>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self { leaves: Vec::new() }
    }

    pub fn push_leaf(&mut self, leaf: Digest) {
        self.leaves.push(leaf);
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Compute the Merkle root. Returns the all-zero digest for an empty
    /// tree, and the single leaf itself for a one-leaf tree.
    pub fn root(&self) -> Digest {
        if self.leaves.is_empty() {
            return [0u8; 32];
        }
        let mut level = self.leaves.clone();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for chunk in level.chunks(2) {
                let mut hasher = Hasher::new();
                hasher.update(&chunk[0]);
                hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
                next.push(*hasher.finalize().as_bytes());
            }
            level = next;
        }
        level[0]
    }
}

/// Hash a single leaf (a WORM entry's own hash, as bytes) into a Merkle leaf
/// digest. Kept as a distinct step from the tree itself so callers can hash
/// leaves incrementally as entries are appended, before a seal is requested.
pub fn leaf_digest(entry_hash: &str) -> Digest {
    *blake3::hash(entry_hash.as_bytes()).as_bytes()
}
