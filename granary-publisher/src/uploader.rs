//! Upload orchestrator
//!
//! Drives the full publish path: validate config, hash the source file,
//! generate the per-publish encryption key, chunk + encrypt + shard with
//! bounded parallelism, build and validate the manifest, distribute shards
//! to farmers through a bounded worker pool, persist the manifest.
//!
//! A shard upload failure is non-fatal as long as at least DATA_SHARDS of a
//! chunk's shards confirm; below that the chunk can never be reconstructed
//! and the whole run fails. Confirmed uploads are never rolled back.

use crate::config::UploadConfig;
use crate::farmer::{FarmerTransport, ShardUploadRequest, STATUS_OK};
use crate::stats::{StatsCollector, UploadStats};
use granary_core::chunk::Shard;
use granary_core::chunker::stream_file;
use granary_core::crypto::{encrypt_chunk, EncryptionKey};
use granary_core::erasure::ErasureCoder;
use granary_core::error::{GranaryError, Result};
use granary_core::DATA_SHARDS;
use granary_manifest::{hash_file, ChunkMeta, FarmerInfo, Manifest, ShardMeta};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Steps of one upload run, in order; any step can transition to Failed.
/// No step is re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Validating,
    Hashing,
    KeyGeneration,
    Processing,
    ManifestBuilding,
    Distributing,
    Persisting,
    Done,
    Failed,
}

/// Result of a successful upload run
#[derive(Debug)]
pub struct UploadOutcome {
    pub manifest: Manifest,
    pub stats: UploadStats,
}

/// Deterministic shard placement: shard position selects the farmer.
pub fn assign_farmer(shard_index: u8, farmer_count: usize) -> usize {
    shard_index as usize % farmer_count
}

/// Upload orchestrator, generic over the farmer transport
pub struct Uploader<T: FarmerTransport + 'static> {
    transport: Arc<T>,
}

impl<T: FarmerTransport + 'static> Uploader<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Publish one file
    pub async fn upload(&self, config: UploadConfig) -> Result<UploadOutcome> {
        self.upload_with_cancel(config, CancellationToken::new())
            .await
    }

    /// Publish one file with a caller-supplied cancellation signal
    ///
    /// Cancellation stops issuing new shard uploads; in-flight uploads finish
    /// or fail on their own.
    #[instrument(skip_all, fields(file = %config.file_path.display()))]
    pub async fn upload_with_cancel(
        &self,
        config: UploadConfig,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome> {
        let stats = Arc::new(StatsCollector::start());
        match self.run(&config, cancel, &stats).await {
            Ok(manifest) => {
                let stats = stats.finalize();
                info!(phase = ?UploadPhase::Done, summary = %stats.summary(), "upload complete");
                Ok(UploadOutcome { manifest, stats })
            }
            Err(e) => {
                error!(phase = ?UploadPhase::Failed, error = %e, "upload failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        config: &UploadConfig,
        cancel: CancellationToken,
        stats: &Arc<StatsCollector>,
    ) -> Result<Manifest> {
        phase(UploadPhase::Validating);
        config.validate()?;

        phase(UploadPhase::Hashing);
        let path = config.file_path.clone();
        let file_hash = tokio::task::spawn_blocking(move || hash_file(&path))
            .await
            .map_err(|e| GranaryError::Internal(format!("hashing task failed: {}", e)))??;
        let file_size = tokio::fs::metadata(&config.file_path).await?.len();
        let file_name = config
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        phase(UploadPhase::KeyGeneration);
        let key = EncryptionKey::generate();

        phase(UploadPhase::Processing);
        let (chunk_metas, shards) = self.process_file(config, &key, stats).await?;
        info!(
            chunks = chunk_metas.len(),
            shards = shards.len(),
            "file processed"
        );

        phase(UploadPhase::ManifestBuilding);
        let farmers: Vec<FarmerInfo> = config
            .farmers
            .iter()
            .enumerate()
            .map(|(index, f)| FarmerInfo {
                index,
                address: f.address.clone(),
                endpoint: f.endpoint.clone(),
                region: f.region.clone(),
            })
            .collect();

        let shard_metas: Vec<ShardMeta> = shards
            .iter()
            .map(|shard| ShardMeta {
                chunk_index: shard.chunk_index,
                shard_index: shard.shard_index,
                hash: shard.hash,
                size: shard.size,
                farmer_index: assign_farmer(shard.shard_index, farmers.len()),
            })
            .collect();

        let manifest = Manifest::new(
            file_name,
            file_size,
            file_hash,
            chunk_metas,
            shard_metas,
            farmers,
            &key,
            config.publisher_address.clone(),
        );
        manifest.validate()?;
        info!(blob_id = %manifest.blob_id, "manifest built");

        phase(UploadPhase::Distributing);
        self.distribute(&manifest, shards, config, cancel, stats)
            .await?;

        phase(UploadPhase::Persisting);
        manifest.save(&config.manifest_path)?;
        info!(path = %config.manifest_path.display(), "manifest saved");

        Ok(manifest)
    }

    /// Chunk, encrypt and shard the source file
    ///
    /// Per-chunk work is stateless and runs on a bounded pool; the chunker's
    /// lookahead buffer lets reads overlap with encryption/sharding.
    async fn process_file(
        &self,
        config: &UploadConfig,
        key: &EncryptionKey,
        stats: &Arc<StatsCollector>,
    ) -> Result<(Vec<ChunkMeta>, Vec<Shard>)> {
        let coder = Arc::new(ErasureCoder::new()?);
        let key = Arc::new(key.clone());
        let semaphore = Arc::new(Semaphore::new(config.parallelism));

        let mut stream = stream_file(&config.file_path);
        let mut tasks: JoinSet<Result<(ChunkMeta, Vec<Shard>)>> = JoinSet::new();

        while let Some(next) = stream.recv().await {
            let chunk = next?;
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| GranaryError::Internal("worker pool closed".to_string()))?;

            let coder = coder.clone();
            let key = key.clone();
            let stats = stats.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let ciphertext = encrypt_chunk(&chunk.data, &key)?;
                let shards = coder.split(&chunk, &ciphertext)?;
                stats.record_chunk_processed();
                stats.record_shards_created(shards.len());
                let meta = ChunkMeta {
                    index: chunk.index,
                    hash: chunk.hash,
                    size: chunk.size,
                };
                Ok((meta, shards))
            });
        }

        let mut chunk_metas = Vec::new();
        let mut all_shards = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (meta, shards) = joined
                .map_err(|e| GranaryError::Internal(format!("chunk task failed: {}", e)))??;
            chunk_metas.push(meta);
            all_shards.extend(shards);
        }

        // Manifest tables are ordered by index regardless of completion order
        chunk_metas.sort_by_key(|c| c.index);
        all_shards.sort_by_key(|s| (s.chunk_index, s.shard_index));

        Ok((chunk_metas, all_shards))
    }

    /// Upload every shard through a bounded worker pool
    async fn distribute(
        &self,
        manifest: &Manifest,
        shards: Vec<Shard>,
        config: &UploadConfig,
        cancel: CancellationToken,
        stats: &Arc<StatsCollector>,
    ) -> Result<()> {
        info!(
            shards = shards.len(),
            farmers = manifest.farmers.len(),
            parallelism = config.parallelism,
            "distributing shards"
        );

        let semaphore = Arc::new(Semaphore::new(config.parallelism));
        let mut tasks: JoinSet<(u32, bool)> = JoinSet::new();

        for shard in shards {
            let farmer_index = assign_farmer(shard.shard_index, manifest.farmers.len());
            let endpoint = manifest.farmers[farmer_index].endpoint.clone();
            let blob_id = manifest.blob_id.clone();
            let transport = self.transport.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let stats = stats.clone();
            let farmer_timeout = config.farmer_timeout;

            tasks.spawn(async move {
                let chunk_index = shard.chunk_index;
                let shard_index = shard.shard_index;

                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (chunk_index, false),
                };
                if cancel.is_cancelled() {
                    stats.record_error(GranaryError::Network(format!(
                        "upload of shard ({}, {}) cancelled",
                        chunk_index, shard_index
                    )));
                    return (chunk_index, false);
                }

                let declared_hash = shard.hash.to_hex();
                let bytes = shard.size as u64;
                let request = ShardUploadRequest::new(&blob_id, &shard);
                let result =
                    tokio::time::timeout(farmer_timeout, transport.upload_shard(&endpoint, request))
                        .await;
                drop(permit);

                match result {
                    Ok(Ok(response))
                        if response.status == STATUS_OK && response.hash == declared_hash =>
                    {
                        stats.record_shard_uploaded(bytes);
                        (chunk_index, true)
                    }
                    Ok(Ok(response)) => {
                        // Confirmed-hash mismatch or farmer-level rejection
                        warn!(
                            endpoint = %endpoint,
                            chunk_index,
                            shard_index,
                            status = %response.status,
                            "shard upload not confirmed"
                        );
                        stats.record_error(GranaryError::Network(format!(
                            "farmer {} did not confirm shard ({}, {}): status {}",
                            endpoint, chunk_index, shard_index, response.status
                        )));
                        (chunk_index, false)
                    }
                    Ok(Err(e)) => {
                        warn!(endpoint = %endpoint, chunk_index, shard_index, error = %e, "shard upload failed");
                        stats.record_error(e);
                        (chunk_index, false)
                    }
                    Err(_) => {
                        warn!(endpoint = %endpoint, chunk_index, shard_index, "shard upload timed out");
                        stats.record_error(GranaryError::Network(format!(
                            "farmer {} timed out for shard ({}, {})",
                            endpoint, chunk_index, shard_index
                        )));
                        (chunk_index, false)
                    }
                }
            });
        }

        let mut confirmed = vec![0usize; manifest.chunk_count];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((chunk_index, true)) => confirmed[chunk_index as usize] += 1,
                Ok((_, false)) => {}
                Err(e) => {
                    stats.record_error(GranaryError::Internal(format!(
                        "upload task failed: {}",
                        e
                    )));
                }
            }
        }

        // A chunk below DATA_SHARDS confirmations can never be reconstructed
        for (index, &count) in confirmed.iter().enumerate() {
            if count < DATA_SHARDS {
                return Err(GranaryError::ChunkUnrecoverable {
                    chunk_index: index as u32,
                    confirmed: count,
                    required: DATA_SHARDS,
                });
            }
        }

        Ok(())
    }
}

fn phase(phase: UploadPhase) {
    info!(phase = ?phase, "entering upload phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FarmerAddr;
    use crate::farmer::MemoryFarmerTransport;
    use granary_core::{CHUNK_SIZE, TOTAL_SHARDS};
    use std::io::Write;

    fn farmers(n: usize) -> Vec<FarmerAddr> {
        (0..n)
            .map(|i| {
                FarmerAddr::new(
                    format!("0xfarmer{}", i),
                    format!("http://farmer{}.example", i),
                    "eu-west",
                )
            })
            .collect()
    }

    fn source_file(size: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..size).map(|i| (i % 247) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    fn upload_config(
        file: &tempfile::NamedTempFile,
        dir: &tempfile::TempDir,
        farmer_count: usize,
    ) -> UploadConfig {
        UploadConfig::new(
            file.path(),
            farmers(farmer_count),
            "0xpublisher",
            dir.path().join("manifest.json"),
        )
    }

    #[tokio::test]
    async fn test_upload_end_to_end() {
        let (file, data) = source_file(2 * CHUNK_SIZE + CHUNK_SIZE / 2);
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MemoryFarmerTransport::new());
        let uploader = Uploader::new(transport.clone());

        let config = upload_config(&file, &dir, 6);
        let outcome = uploader.upload(config.clone()).await.unwrap();

        let manifest = &outcome.manifest;
        assert_eq!(manifest.chunk_count, 3);
        assert_eq!(manifest.chunks.len(), 3);
        assert_eq!(manifest.shards.len(), 3 * TOTAL_SHARDS);
        assert_eq!(manifest.file_size, data.len() as u64);
        assert_eq!(manifest.chunks[2].size, CHUNK_SIZE / 2);
        manifest.validate().unwrap();

        // Deterministic placement: shard position selects the farmer
        for shard in &manifest.shards {
            assert_eq!(shard.farmer_index, shard.shard_index as usize % 6);
        }

        assert_eq!(outcome.stats.chunks_processed, 3);
        assert_eq!(outcome.stats.shards_created, 18);
        assert_eq!(outcome.stats.shards_uploaded, 18);
        assert!(outcome.stats.errors.is_empty());
        assert_eq!(transport.shard_count(), 18);

        // The persisted manifest loads back intact
        let loaded = Manifest::load(dir.path().join("manifest.json")).unwrap();
        assert_eq!(&loaded, manifest);
    }

    #[tokio::test]
    async fn test_upload_empty_file() {
        let (file, _) = source_file(0);
        let dir = tempfile::tempdir().unwrap();
        let uploader = Uploader::new(Arc::new(MemoryFarmerTransport::new()));

        let outcome = uploader.upload(upload_config(&file, &dir, 3)).await.unwrap();
        assert_eq!(outcome.manifest.chunk_count, 0);
        assert!(outcome.manifest.shards.is_empty());
        assert_eq!(outcome.stats.shards_uploaded, 0);
    }

    #[tokio::test]
    async fn test_upload_tolerates_two_lost_farmers() {
        let (file, _) = source_file(CHUNK_SIZE + 123);
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MemoryFarmerTransport::new());
        transport.fail_endpoint("http://farmer1.example");
        transport.fail_endpoint("http://farmer4.example");

        let uploader = Uploader::new(transport.clone());
        let outcome = uploader.upload(upload_config(&file, &dir, 6)).await.unwrap();

        // 2 chunks x 4 surviving shards confirmed, 2 failures each recorded
        assert_eq!(outcome.stats.shards_uploaded, 8);
        assert_eq!(outcome.stats.errors.len(), 4);
    }

    #[tokio::test]
    async fn test_upload_fails_below_data_shards() {
        let (file, _) = source_file(CHUNK_SIZE / 4);
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MemoryFarmerTransport::new());
        transport.fail_endpoint("http://farmer0.example");
        transport.fail_endpoint("http://farmer2.example");
        transport.fail_endpoint("http://farmer5.example");

        let uploader = Uploader::new(transport);
        let result = uploader.upload(upload_config(&file, &dir, 6)).await;

        assert!(matches!(
            result,
            Err(GranaryError::ChunkUnrecoverable {
                chunk_index: 0,
                confirmed: 3,
                required: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_confirmation_counts_as_failure() {
        let (file, _) = source_file(1000);
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MemoryFarmerTransport::new());
        transport.corrupt_confirmations("http://farmer3.example");

        let uploader = Uploader::new(transport);
        let outcome = uploader.upload(upload_config(&file, &dir, 6)).await.unwrap();

        assert_eq!(outcome.stats.shards_uploaded, 5);
        assert_eq!(outcome.stats.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_fails_unrecoverable() {
        let (file, _) = source_file(1000);
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MemoryFarmerTransport::new());
        let uploader = Uploader::new(transport.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = uploader
            .upload_with_cancel(upload_config(&file, &dir, 6), cancel)
            .await;

        assert!(matches!(
            result,
            Err(GranaryError::ChunkUnrecoverable { .. })
        ));
        // No uploads were issued after cancellation
        assert_eq!(transport.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MemoryFarmerTransport::new());
        let uploader = Uploader::new(transport.clone());

        let config = UploadConfig::new(
            "/nonexistent/input",
            vec![],
            "0xpublisher",
            dir.path().join("manifest.json"),
        );
        let result = uploader.upload(config).await;

        assert!(matches!(result, Err(GranaryError::Configuration(_))));
        assert_eq!(transport.upload_calls(), 0);
    }

    #[test]
    fn test_assign_farmer_deterministic() {
        assert_eq!(assign_farmer(0, 6), 0);
        assert_eq!(assign_farmer(5, 6), 5);
        assert_eq!(assign_farmer(4, 3), 1);
        assert_eq!(assign_farmer(5, 2), 1);
    }
}
