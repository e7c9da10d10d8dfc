//! Farmer transport
//!
//! The orchestrator reaches farmers through the narrow [`FarmerTransport`]
//! seam: one call to store a shard, one to fetch it back. Connection setup,
//! network-level retries and farmer discovery are the transport's problem,
//! not the pipeline's. A call either resolves to a response or fails.
//!
//! [`HttpFarmerClient`] is the production implementation (JSON over HTTP,
//! per-call timeout). [`MemoryFarmerTransport`] backs the tests.

use base64::Engine;
use granary_core::chunk::Shard;
use granary_core::error::{GranaryError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default per-farmer-call timeout
pub const DEFAULT_FARMER_TIMEOUT: Duration = Duration::from_secs(30);

/// Response status a farmer returns on success
pub const STATUS_OK: &str = "ok";

/// JSON payload sent to a farmer to store one shard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardUploadRequest {
    pub blob_id: String,
    pub chunk_index: u32,
    pub shard_index: u8,
    /// Shard bytes, base64-encoded
    pub data: String,
    /// Hex hash of the shard bytes
    pub hash: String,
    pub size: usize,
}

impl ShardUploadRequest {
    /// Build an upload request for one shard
    pub fn new(blob_id: &str, shard: &Shard) -> Self {
        Self {
            blob_id: blob_id.to_string(),
            chunk_index: shard.chunk_index,
            shard_index: shard.shard_index,
            data: base64::engine::general_purpose::STANDARD.encode(&shard.data),
            hash: shard.hash.to_hex(),
            size: shard.size,
        }
    }
}

/// Farmer's reply to a shard upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardUploadResponse {
    pub status: String,
    pub message: String,
    /// Farmer-confirmed hash of the bytes it stored
    pub hash: String,
}

/// Farmer's reply to a shard download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardDownloadResponse {
    pub status: String,
    pub message: String,
    /// Shard bytes, base64-encoded
    pub data: String,
    /// Hex hash of the shard bytes
    pub hash: String,
}

impl ShardDownloadResponse {
    /// Decode the shard payload
    pub fn decode_data(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| GranaryError::Network(format!("invalid shard payload: {}", e)))
    }
}

/// Request/response channel to one farmer
///
/// Implementations must be Send + Sync; the orchestrator shares one transport
/// across all upload workers.
pub trait FarmerTransport: Send + Sync {
    /// Store one shard on the farmer at `endpoint`
    fn upload_shard<'a>(
        &'a self,
        endpoint: &'a str,
        request: ShardUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ShardUploadResponse>> + Send + 'a>>;

    /// Fetch one shard back from the farmer at `endpoint`
    fn download_shard<'a>(
        &'a self,
        endpoint: &'a str,
        blob_id: &'a str,
        chunk_index: u32,
        shard_index: u8,
    ) -> Pin<Box<dyn Future<Output = Result<ShardDownloadResponse>> + Send + 'a>>;
}

/// HTTP farmer client
///
/// POST `{endpoint}/shards` to store, GET
/// `{endpoint}/shards/{blob_id}/{chunk_index}/{shard_index}` to fetch.
/// Carries its own per-call timeout so one unresponsive farmer cannot stall
/// shards destined for others.
pub struct HttpFarmerClient {
    client: reqwest::Client,
}

impl HttpFarmerClient {
    /// Create a client with the default per-call timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FARMER_TIMEOUT)
    }

    /// Create a client with a custom per-call timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GranaryError::Network(format!("failed to build client: {}", e)))?;
        Ok(Self { client })
    }
}

impl FarmerTransport for HttpFarmerClient {
    fn upload_shard<'a>(
        &'a self,
        endpoint: &'a str,
        request: ShardUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ShardUploadResponse>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/shards", endpoint.trim_end_matches('/'));
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| GranaryError::Network(format!("upload to {}: {}", endpoint, e)))?;

            if !response.status().is_success() {
                return Err(GranaryError::Network(format!(
                    "farmer {} returned HTTP {}",
                    endpoint,
                    response.status()
                )));
            }

            response
                .json::<ShardUploadResponse>()
                .await
                .map_err(|e| GranaryError::Network(format!("bad response from {}: {}", endpoint, e)))
        })
    }

    fn download_shard<'a>(
        &'a self,
        endpoint: &'a str,
        blob_id: &'a str,
        chunk_index: u32,
        shard_index: u8,
    ) -> Pin<Box<dyn Future<Output = Result<ShardDownloadResponse>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!(
                "{}/shards/{}/{}/{}",
                endpoint.trim_end_matches('/'),
                blob_id,
                chunk_index,
                shard_index
            );
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| GranaryError::Network(format!("download from {}: {}", endpoint, e)))?;

            if !response.status().is_success() {
                return Err(GranaryError::Network(format!(
                    "farmer {} returned HTTP {}",
                    endpoint,
                    response.status()
                )));
            }

            response
                .json::<ShardDownloadResponse>()
                .await
                .map_err(|e| GranaryError::Network(format!("bad response from {}: {}", endpoint, e)))
        })
    }
}

type ShardKey = (String, String, u32, u8); // (endpoint, blob_id, chunk, shard)

/// In-memory farmer transport
///
/// Used for testing the orchestrator and retriever without a network.
/// Individual endpoints can be failed, and upload confirmations can be
/// corrupted, to exercise the partial-failure paths.
#[derive(Default)]
pub struct MemoryFarmerTransport {
    shards: RwLock<HashMap<ShardKey, (Vec<u8>, String)>>,
    failed_endpoints: RwLock<HashSet<String>>,
    corrupt_confirmations: RwLock<HashSet<String>>,
    uploads: AtomicU64,
    downloads: AtomicU64,
}

impl MemoryFarmerTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `endpoint` fail with a network error
    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failed_endpoints.write().insert(endpoint.to_string());
    }

    /// Make `endpoint` confirm uploads with a wrong hash
    pub fn corrupt_confirmations(&self, endpoint: &str) {
        self.corrupt_confirmations
            .write()
            .insert(endpoint.to_string());
    }

    /// Flip a byte in a stored shard, keeping its recorded hash
    ///
    /// Simulates silent corruption on the farmer's disk.
    pub fn tamper_shard(&self, endpoint: &str, blob_id: &str, chunk_index: u32, shard_index: u8) {
        let key = (
            endpoint.to_string(),
            blob_id.to_string(),
            chunk_index,
            shard_index,
        );
        if let Some((data, _)) = self.shards.write().get_mut(&key) {
            if let Some(byte) = data.first_mut() {
                *byte ^= 0xff;
            }
        }
    }

    /// Number of shards currently stored
    pub fn shard_count(&self) -> usize {
        self.shards.read().len()
    }

    /// Total upload calls observed (including failed ones)
    pub fn upload_calls(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Total download calls observed (including failed ones)
    pub fn download_calls(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }
}

impl FarmerTransport for MemoryFarmerTransport {
    fn upload_shard<'a>(
        &'a self,
        endpoint: &'a str,
        request: ShardUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ShardUploadResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.uploads.fetch_add(1, Ordering::Relaxed);

            if self.failed_endpoints.read().contains(endpoint) {
                return Err(GranaryError::Network(format!(
                    "farmer {} unreachable",
                    endpoint
                )));
            }

            let data = base64::engine::general_purpose::STANDARD
                .decode(&request.data)
                .map_err(|e| GranaryError::Network(format!("invalid shard payload: {}", e)))?;

            let confirmed_hash = if self.corrupt_confirmations.read().contains(endpoint) {
                "0".repeat(64)
            } else {
                request.hash.clone()
            };

            let key = (
                endpoint.to_string(),
                request.blob_id.clone(),
                request.chunk_index,
                request.shard_index,
            );
            self.shards.write().insert(key, (data, request.hash));

            Ok(ShardUploadResponse {
                status: STATUS_OK.to_string(),
                message: "stored".to_string(),
                hash: confirmed_hash,
            })
        })
    }

    fn download_shard<'a>(
        &'a self,
        endpoint: &'a str,
        blob_id: &'a str,
        chunk_index: u32,
        shard_index: u8,
    ) -> Pin<Box<dyn Future<Output = Result<ShardDownloadResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.downloads.fetch_add(1, Ordering::Relaxed);

            if self.failed_endpoints.read().contains(endpoint) {
                return Err(GranaryError::Network(format!(
                    "farmer {} unreachable",
                    endpoint
                )));
            }

            let key = (
                endpoint.to_string(),
                blob_id.to_string(),
                chunk_index,
                shard_index,
            );
            let shards = self.shards.read();
            let (data, hash) = shards.get(&key).ok_or_else(|| {
                GranaryError::Network(format!(
                    "farmer {} has no shard ({}, {})",
                    endpoint, chunk_index, shard_index
                ))
            })?;

            Ok(ShardDownloadResponse {
                status: STATUS_OK.to_string(),
                message: "found".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(data),
                hash: hash.clone(),
            })
        })
    }
}
