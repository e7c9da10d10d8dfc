//! Granary Core Library
//!
//! Core primitives for the Granary blob distribution pipeline.
//! This crate provides:
//! - Streaming fixed-size chunking with bounded lookahead
//! - Reed-Solomon erasure coding (4 data + 2 parity shards)
//! - Cryptographic primitives (Blake3 hashing, AES-GCM encryption)
//! - Order-insensitive chunk assembly
//! - Common types and error handling

pub mod assembler;
pub mod chunk;
pub mod chunker;
pub mod crypto;
pub mod erasure;
pub mod error;

pub use assembler::assemble_chunks;
pub use chunk::{Chunk, Shard};
pub use chunker::{stream_chunks, stream_file, ChunkStream};
pub use crypto::{decrypt_chunk, encrypt_chunk, ContentHash, EncryptionKey};
pub use erasure::ErasureCoder;
pub use error::{GranaryError, Result};

/// Fixed chunk size: every chunk holds exactly this many plaintext bytes,
/// except possibly the last chunk of a file.
pub const CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

/// Erasure coding parameters
/// - 4 data shards: minimum required to reconstruct
/// - 2 parity shards: can tolerate loss of any 2 shards
/// - 6 total shards distributed across farmers
pub const DATA_SHARDS: usize = 4;
pub const PARITY_SHARDS: usize = 2;
pub const TOTAL_SHARDS: usize = DATA_SHARDS + PARITY_SHARDS;

/// Number of chunks the streaming chunker buffers ahead of the consumer,
/// so encryption/sharding can overlap with source reads.
pub const CHUNK_LOOKAHEAD: usize = 4;
