//! Granary Publisher Library
//!
//! Orchestration for the Granary blob distribution pipeline.
//! This crate provides:
//! - The upload orchestrator: chunk, encrypt, shard, distribute, persist
//! - The retrieval orchestrator: fetch, reconstruct, decrypt, reassemble
//! - The farmer transport seam (HTTP client and in-memory test transport)
//! - Upload configuration and run statistics
//!
//! Core primitives (chunking, erasure coding, crypto) live in
//! `granary-core`; the manifest format lives in `granary-manifest`.

pub mod config;
pub mod farmer;
pub mod retriever;
pub mod stats;
pub mod uploader;

pub use config::{FarmerAddr, RetrieveConfig, UploadConfig, DEFAULT_PARALLELISM};
pub use farmer::{
    FarmerTransport, HttpFarmerClient, MemoryFarmerTransport, ShardDownloadResponse,
    ShardUploadRequest, ShardUploadResponse, DEFAULT_FARMER_TIMEOUT,
};
pub use retriever::Retriever;
pub use stats::{StatsCollector, UploadStats};
pub use uploader::{assign_farmer, UploadOutcome, UploadPhase, Uploader};
