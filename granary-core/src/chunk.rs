//! Chunk and shard types
//!
//! A chunk is one fixed-size slice of the original plaintext file; a shard is
//! one erasure-coded fragment of one chunk's ciphertext. Payload bytes are
//! transient: they move through the pipeline and are never persisted, only
//! their hashes end up in the manifest.

use crate::crypto::ContentHash;
use bytes::Bytes;

/// One fixed-size slice of the source file
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based, contiguous chunk index
    pub index: u32,

    /// Plaintext bytes (transient, never persisted)
    pub data: Bytes,

    /// Blake3 hash of the plaintext bytes
    pub hash: ContentHash,

    /// Size of the chunk in bytes
    pub size: usize,
}

impl Chunk {
    /// Create a chunk, hashing the given plaintext
    pub fn new(index: u32, data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let hash = ContentHash::compute(&data);
        let size = data.len();
        Self {
            index,
            data,
            hash,
            size,
        }
    }

    /// Verify the chunk's integrity by recomputing its hash
    pub fn verify(&self) -> bool {
        self.hash.verify(&self.data)
    }
}

/// One erasure-coded fragment of one chunk's ciphertext
#[derive(Debug, Clone)]
pub struct Shard {
    /// Index of the chunk this shard was produced from
    pub chunk_index: u32,

    /// Shard position within the chunk (0..TOTAL_SHARDS)
    pub shard_index: u8,

    /// Shard bytes (transient, never persisted)
    pub data: Bytes,

    /// Blake3 hash of the shard bytes, computed once after encoding
    pub hash: ContentHash,

    /// Size of the shard in bytes
    pub size: usize,
}

impl Shard {
    /// Whether this shard is a parity shard (vs. a direct data partition)
    pub fn is_parity(&self) -> bool {
        (self.shard_index as usize) >= crate::DATA_SHARDS
    }

    /// Verify the shard's integrity against its declared hash
    pub fn verify(&self) -> bool {
        self.hash.verify(&self.data)
    }
}
