//! Reed-Solomon Erasure Coding
//!
//! Implements (k=4, m=2) erasure coding over one encrypted chunk:
//! - k=4 data shards (minimum required to reconstruct)
//! - m=2 parity shards (redundancy)
//! - 6 total shards scattered across farmers
//! - Any 4 of the 6 shards reconstruct the chunk exactly
//!
//! Shard hashes are computed once, right after encoding. Reconstruction
//! verifies every supplied shard against its declared hash before any
//! Reed-Solomon arithmetic runs, so a corrupted shard can never silently
//! poison the result.

use crate::chunk::{Chunk, Shard};
use crate::crypto::{ContentHash, ENCRYPTION_OVERHEAD};
use crate::error::{GranaryError, Result};
use crate::{DATA_SHARDS, PARITY_SHARDS, TOTAL_SHARDS};
use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;

/// Reed-Solomon encoder/decoder for chunk ciphertexts
pub struct ErasureCoder {
    encoder: ReedSolomon,
}

impl ErasureCoder {
    /// Create a new coder with the fixed (4, 2) configuration
    pub fn new() -> Result<Self> {
        let encoder = ReedSolomon::new(DATA_SHARDS, PARITY_SHARDS)?;
        Ok(Self { encoder })
    }

    /// Split one chunk's ciphertext into 6 shards (4 data + 2 parity)
    ///
    /// The ciphertext must be the encryption of exactly this chunk, i.e.
    /// `chunk.size + ENCRYPTION_OVERHEAD` bytes long.
    pub fn split(&self, chunk: &Chunk, ciphertext: &[u8]) -> Result<Vec<Shard>> {
        let expected = chunk.size + ENCRYPTION_OVERHEAD;
        if ciphertext.len() != expected {
            return Err(GranaryError::SizeMismatch {
                expected,
                actual: ciphertext.len(),
            });
        }

        // Pad so the ciphertext partitions into equal data shards
        let shard_size = ciphertext.len().div_ceil(DATA_SHARDS);
        let mut padded = ciphertext.to_vec();
        padded.resize(shard_size * DATA_SHARDS, 0);

        let mut shards: Vec<Vec<u8>> = padded.chunks(shard_size).map(|c| c.to_vec()).collect();
        for _ in 0..PARITY_SHARDS {
            shards.push(vec![0u8; shard_size]);
        }

        // Fills in the parity shards
        self.encoder.encode(&mut shards)?;

        let result = shards
            .into_iter()
            .enumerate()
            .map(|(i, data)| {
                let hash = ContentHash::compute(&data);
                let size = data.len();
                Shard {
                    chunk_index: chunk.index,
                    shard_index: i as u8,
                    data: Bytes::from(data),
                    hash,
                    size,
                }
            })
            .collect();

        Ok(result)
    }

    /// Rebuild one chunk's ciphertext from any >= 4 of its shards
    ///
    /// `original_size` is the ciphertext length; code padding beyond it is
    /// stripped from the result.
    pub fn reconstruct(&self, shards: &[Shard], original_size: usize) -> Result<Vec<u8>> {
        if shards.len() < DATA_SHARDS {
            return Err(GranaryError::InsufficientShards {
                available: shards.len(),
                required: DATA_SHARDS,
            });
        }

        if original_size == 0 {
            return Err(GranaryError::ErasureCoding("invalid data size".to_string()));
        }

        let expected_chunk = shards[0].chunk_index;
        for shard in shards {
            if shard.chunk_index != expected_chunk {
                return Err(GranaryError::MixedChunks {
                    expected: expected_chunk,
                    found: shard.chunk_index,
                });
            }
            // Verified before any reconstruction arithmetic runs
            if !shard.verify() {
                return Err(GranaryError::ShardVerification {
                    shard_index: shard.shard_index,
                });
            }
        }

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; TOTAL_SHARDS];
        for shard in shards {
            let index = shard.shard_index as usize;
            if index >= TOTAL_SHARDS {
                return Err(GranaryError::InvalidShardIndex {
                    index,
                    max: TOTAL_SHARDS - 1,
                });
            }
            if slots[index].is_some() {
                return Err(GranaryError::DuplicateShardIndex {
                    index: shard.shard_index,
                });
            }
            slots[index] = Some(shard.data.to_vec());
        }

        // Solve for the missing slots
        self.encoder.reconstruct(&mut slots)?;

        // Internal consistency re-check of the full shard set
        let mut refs: Vec<&[u8]> = Vec::with_capacity(TOTAL_SHARDS);
        for slot in &slots {
            match slot {
                Some(data) => refs.push(data),
                None => {
                    return Err(GranaryError::ErasureCoding(
                        "reconstruction left a missing shard".to_string(),
                    ))
                }
            }
        }
        if !self.encoder.verify(&refs)? {
            return Err(GranaryError::ErasureCoding(
                "reconstructed data failed verification".to_string(),
            ));
        }

        // Join the data shards and strip code padding
        let mut result = Vec::with_capacity(refs[0].len() * DATA_SHARDS);
        for shard in refs.iter().take(DATA_SHARDS) {
            result.extend_from_slice(shard);
        }
        result.truncate(original_size);
        Ok(result)
    }
}
