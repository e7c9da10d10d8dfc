//! Error types for Granary
//!
//! Provides a unified error type for all Granary operations.

use thiserror::Error;

/// Result type alias for Granary operations
pub type Result<T> = std::result::Result<T, GranaryError>;

/// Unified error type for Granary
#[derive(Error, Debug)]
pub enum GranaryError {
    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    #[error("Data size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Shard {shard_index} failed hash verification")]
    ShardVerification { shard_index: u8 },

    #[error("Shards belong to different chunks: expected {expected}, found {found}")]
    MixedChunks { expected: u32, found: u32 },

    #[error("Invalid shard index: {index} (max: {max})")]
    InvalidShardIndex { index: usize, max: usize },

    #[error("Duplicate shard index: {index}")]
    DuplicateShardIndex { index: u8 },

    // ===== Cryptography Errors =====
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // ===== Assembly Errors =====
    #[error("Chunk index {index} out of bounds (max: {max})")]
    ChunkOutOfBounds { index: u32, max: u32 },

    #[error("Incomplete assembly: expected {expected} chunks, got {received}")]
    IncompleteAssembly { expected: usize, received: usize },

    // ===== Distribution Errors =====
    #[error("Chunk {chunk_index} unrecoverable: only {confirmed} of {required} required shards confirmed")]
    ChunkUnrecoverable {
        chunk_index: u32,
        confirmed: usize,
        required: usize,
    },

    #[error("Network error: {0}")]
    Network(String),

    // ===== Manifest Errors =====
    #[error("Manifest error: {0}")]
    Manifest(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reed_solomon_erasure::Error> for GranaryError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        GranaryError::ErasureCoding(err.to_string())
    }
}

impl From<serde_json::Error> for GranaryError {
    fn from(err: serde_json::Error) -> Self {
        GranaryError::Serialization(err.to_string())
    }
}
