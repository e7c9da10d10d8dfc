//! Granary Manifest
//!
//! The manifest is the durable descriptor of one published blob: it binds the
//! blob's identity, chunk and shard tables, farmer assignments and encryption
//! key. It is constructed once at publish time, immutable thereafter, and
//! serialized as human-inspectable JSON that any retriever can load.

use chrono::{DateTime, Utc};
use granary_core::crypto::ContentHash;
use granary_core::error::{GranaryError, Result};
use granary_core::{EncryptionKey, CHUNK_SIZE, DATA_SHARDS, PARITY_SHARDS, TOTAL_SHARDS};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Manifest schema version
pub const MANIFEST_VERSION: &str = "1.0";

/// One storage node holding shards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmerInfo {
    /// Stable position in the manifest's farmer directory
    pub index: usize,
    /// Identity / payment key
    pub address: String,
    /// Network location
    pub endpoint: String,
    /// Deployment region
    pub region: String,
}

/// Durable metadata for one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Chunk index
    pub index: u32,
    /// Blake3 hash of the plaintext chunk
    pub hash: ContentHash,
    /// Plaintext size of the chunk in bytes
    pub size: usize,
}

/// Durable metadata for one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMeta {
    /// Which chunk this shard belongs to
    pub chunk_index: u32,
    /// Shard position within the chunk (0..total_shards)
    pub shard_index: u8,
    /// Blake3 hash of the shard bytes
    pub hash: ContentHash,
    /// Shard size in bytes
    pub size: usize,
    /// Index into the farmer directory
    pub farmer_index: usize,
}

/// The durable descriptor of one published blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest schema version
    pub version: String,
    /// Random 256-bit blob identifier (`0x` + hex)
    pub blob_id: String,
    /// Original file name
    pub file_name: String,
    /// Original file size in bytes
    pub file_size: u64,
    /// Blake3 hash of the whole original file
    pub original_file_hash: ContentHash,
    /// Size of each chunk in bytes (last chunk may be shorter)
    pub chunk_size: usize,
    /// Total number of chunks
    pub chunk_count: usize,
    /// Erasure coding parameters
    pub data_shards: usize,
    pub parity_shards: usize,
    pub total_shards: usize,
    /// Per-chunk metadata, by index
    pub chunks: Vec<ChunkMeta>,
    /// Per-shard metadata with farmer assignments
    pub shards: Vec<ShardMeta>,
    /// Farmer directory, indices stable in input order
    pub farmers: Vec<FarmerInfo>,
    /// Hex-encoded symmetric encryption key for the chunks
    pub encryption_key: String,
    /// Publisher's wallet address
    pub publisher_address: String,
    /// Manifest creation time
    pub created_at: DateTime<Utc>,
}

impl Manifest {
    /// Create a new manifest with a fresh random blob id
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_name: impl Into<String>,
        file_size: u64,
        original_file_hash: ContentHash,
        chunks: Vec<ChunkMeta>,
        shards: Vec<ShardMeta>,
        farmers: Vec<FarmerInfo>,
        key: &EncryptionKey,
        publisher_address: impl Into<String>,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            blob_id: generate_blob_id(),
            file_name: file_name.into(),
            file_size,
            original_file_hash,
            chunk_size: CHUNK_SIZE,
            chunk_count: chunks.len(),
            data_shards: DATA_SHARDS,
            parity_shards: PARITY_SHARDS,
            total_shards: TOTAL_SHARDS,
            chunks,
            shards,
            farmers,
            encryption_key: key.to_hex(),
            publisher_address: publisher_address.into(),
            created_at: Utc::now(),
        }
    }

    /// Hash of the chunk at `index`, if known
    pub fn chunk_hash(&self, index: u32) -> Option<&ContentHash> {
        self.chunks
            .iter()
            .find(|c| c.index == index)
            .map(|c| &c.hash)
    }

    /// All shard records for one chunk, in insertion order
    pub fn shards_for_chunk(&self, chunk_index: u32) -> Vec<&ShardMeta> {
        self.shards
            .iter()
            .filter(|s| s.chunk_index == chunk_index)
            .collect()
    }

    /// The farmer a shard is assigned to, if the index is in range
    pub fn farmer_for_shard(&self, shard: &ShardMeta) -> Option<&FarmerInfo> {
        self.farmers.get(shard.farmer_index)
    }

    /// Farmers holding shards of one chunk, de-duplicated, each appearing
    /// once in order of first appearance
    pub fn farmers_for_chunk(&self, chunk_index: u32) -> Vec<&FarmerInfo> {
        let mut seen: Vec<usize> = Vec::new();
        let mut farmers = Vec::new();
        for shard in self.shards_for_chunk(chunk_index) {
            if seen.contains(&shard.farmer_index) {
                continue;
            }
            if let Some(farmer) = self.farmer_for_shard(shard) {
                seen.push(shard.farmer_index);
                farmers.push(farmer);
            }
        }
        farmers
    }

    /// Decode the stored encryption key
    pub fn encryption_key_bytes(&self) -> Result<EncryptionKey> {
        EncryptionKey::from_hex(&self.encryption_key)
    }

    /// Check the manifest's cross-reference invariants
    ///
    /// Every shard's farmer and chunk indices must resolve, and every chunk
    /// must have exactly `total_shards` shard records spanning shard indices
    /// 0..total_shards with no gaps or duplicates.
    pub fn validate(&self) -> Result<()> {
        for shard in &self.shards {
            if shard.farmer_index >= self.farmers.len() {
                return Err(GranaryError::Manifest(format!(
                    "shard ({}, {}) references unknown farmer {}",
                    shard.chunk_index, shard.shard_index, shard.farmer_index
                )));
            }
            if shard.chunk_index as usize >= self.chunks.len() {
                return Err(GranaryError::Manifest(format!(
                    "shard ({}, {}) references unknown chunk",
                    shard.chunk_index, shard.shard_index
                )));
            }
        }

        for chunk in &self.chunks {
            let mut present = vec![false; self.total_shards];
            let mut count = 0;
            for shard in self.shards_for_chunk(chunk.index) {
                let index = shard.shard_index as usize;
                if index >= self.total_shards {
                    return Err(GranaryError::Manifest(format!(
                        "chunk {} has shard index {} out of range",
                        chunk.index, shard.shard_index
                    )));
                }
                if present[index] {
                    return Err(GranaryError::Manifest(format!(
                        "chunk {} has duplicate shard index {}",
                        chunk.index, shard.shard_index
                    )));
                }
                present[index] = true;
                count += 1;
            }
            if count != self.total_shards {
                return Err(GranaryError::Manifest(format!(
                    "chunk {} has {} shard records, expected {}",
                    chunk.index, count, self.total_shards
                )));
            }
        }

        Ok(())
    }

    /// Write the manifest as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Read and validate a manifest from a JSON file
    ///
    /// Unknown additive fields in the document are tolerated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&data)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Random 256-bit blob id, `0x`-prefixed hex
fn generate_blob_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// Compute the Blake3 hash of an entire file
pub fn hash_file(path: impl AsRef<Path>) -> Result<ContentHash> {
    ContentHash::compute_file(path)
}
