//! Retrieval
//!
//! Mirrors the publish path: for each chunk, fetch shards from their assigned
//! farmers until enough verified ones are in hand, reconstruct the
//! ciphertext, decrypt, check the plaintext against the manifest, and hand
//! the chunk to the assembler. Chunks are recovered with bounded parallelism
//! and written at their byte offsets, so completion order does not matter.
//!
//! A failed or corrupt shard is skipped with a warning; a chunk only fails
//! once fewer than DATA_SHARDS of its shards verify.

use crate::config::RetrieveConfig;
use crate::farmer::{FarmerTransport, STATUS_OK};
use bytes::Bytes;
use granary_core::assembler::assemble_chunks;
use granary_core::chunk::{Chunk, Shard};
use granary_core::crypto::{decrypt_chunk, EncryptionKey, ENCRYPTION_OVERHEAD};
use granary_core::erasure::ErasureCoder;
use granary_core::error::{GranaryError, Result};
use granary_core::{CHUNK_LOOKAHEAD, DATA_SHARDS};
use granary_manifest::{ChunkMeta, Manifest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Retrieval orchestrator, generic over the farmer transport
pub struct Retriever<T: FarmerTransport + 'static> {
    transport: Arc<T>,
}

impl<T: FarmerTransport + 'static> Retriever<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Reassemble a published blob into `config.output_path`
    pub async fn retrieve(&self, manifest: &Manifest, config: RetrieveConfig) -> Result<()> {
        self.retrieve_with_cancel(manifest, config, CancellationToken::new())
            .await
    }

    /// Reassemble a blob with a caller-supplied cancellation signal
    ///
    /// Cancellation stops issuing new shard downloads; chunks already being
    /// recovered finish or fail on their own.
    #[instrument(skip_all, fields(blob_id = %manifest.blob_id))]
    pub async fn retrieve_with_cancel(
        &self,
        manifest: &Manifest,
        config: RetrieveConfig,
        cancel: CancellationToken,
    ) -> Result<()> {
        config.validate()?;
        manifest.validate()?;
        let key = Arc::new(manifest.encryption_key_bytes()?);
        let coder = Arc::new(ErasureCoder::new()?);
        let manifest = Arc::new(manifest.clone());

        info!(
            chunks = manifest.chunk_count,
            output = %config.output_path.display(),
            "retrieving blob"
        );

        let (chunk_tx, chunk_rx) = mpsc::channel::<Chunk>(CHUNK_LOOKAHEAD);
        let assembler = tokio::spawn(assemble_chunks(
            chunk_rx,
            config.output_path.clone(),
            manifest.chunk_count,
        ));

        let semaphore = Arc::new(Semaphore::new(config.parallelism));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        for meta in manifest.chunks.clone() {
            let transport = self.transport.clone();
            let manifest = manifest.clone();
            let coder = coder.clone();
            let key = key.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let chunk_tx = chunk_tx.clone();
            let farmer_timeout = config.farmer_timeout;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| GranaryError::Internal("worker pool closed".to_string()))?;
                if cancel.is_cancelled() {
                    return Err(GranaryError::Network(format!(
                        "retrieve of chunk {} cancelled",
                        meta.index
                    )));
                }

                let chunk = recover_chunk(
                    transport.as_ref(),
                    &manifest,
                    &meta,
                    &coder,
                    &key,
                    farmer_timeout,
                    &cancel,
                )
                .await?;

                chunk_tx
                    .send(chunk)
                    .await
                    .map_err(|_| GranaryError::Internal("assembler stopped early".to_string()))
            });
        }
        drop(chunk_tx);

        // The first chunk failure is the run's error; the assembler's
        // IncompleteAssembly in that case is only a consequence of it.
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error =
                            Some(GranaryError::Internal(format!("chunk task failed: {}", e)));
                    }
                }
            }
        }

        let assembled = assembler
            .await
            .map_err(|e| GranaryError::Internal(format!("assembler task failed: {}", e)))?;
        if let Some(e) = first_error {
            return Err(e);
        }
        assembled?;

        info!("retrieve complete");
        Ok(())
    }
}

/// Recover one chunk's plaintext from its farmers
///
/// Shards are tried in shard-index order (data shards first) and fetching
/// stops as soon as DATA_SHARDS verified shards are in hand.
async fn recover_chunk<T: FarmerTransport + ?Sized>(
    transport: &T,
    manifest: &Manifest,
    meta: &ChunkMeta,
    coder: &ErasureCoder,
    key: &EncryptionKey,
    farmer_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Chunk> {
    let mut shard_metas = manifest.shards_for_chunk(meta.index);
    shard_metas.sort_by_key(|s| s.shard_index);

    let mut shards: Vec<Shard> = Vec::with_capacity(DATA_SHARDS);
    for shard_meta in shard_metas {
        if shards.len() >= DATA_SHARDS || cancel.is_cancelled() {
            break;
        }
        let farmer = match manifest.farmer_for_shard(shard_meta) {
            Some(farmer) => farmer,
            None => continue,
        };

        let fetched = tokio::time::timeout(
            farmer_timeout,
            transport.download_shard(
                &farmer.endpoint,
                &manifest.blob_id,
                shard_meta.chunk_index,
                shard_meta.shard_index,
            ),
        )
        .await;

        let response = match fetched {
            Ok(Ok(response)) if response.status == STATUS_OK => response,
            Ok(Ok(response)) => {
                warn!(
                    endpoint = %farmer.endpoint,
                    chunk_index = meta.index,
                    shard_index = shard_meta.shard_index,
                    status = %response.status,
                    "farmer rejected shard request"
                );
                continue;
            }
            Ok(Err(e)) => {
                warn!(
                    endpoint = %farmer.endpoint,
                    chunk_index = meta.index,
                    shard_index = shard_meta.shard_index,
                    error = %e,
                    "shard download failed"
                );
                continue;
            }
            Err(_) => {
                warn!(
                    endpoint = %farmer.endpoint,
                    chunk_index = meta.index,
                    shard_index = shard_meta.shard_index,
                    "shard download timed out"
                );
                continue;
            }
        };

        let data = match response.decode_data() {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    endpoint = %farmer.endpoint,
                    chunk_index = meta.index,
                    shard_index = shard_meta.shard_index,
                    error = %e,
                    "shard payload undecodable"
                );
                continue;
            }
        };

        // The manifest hash is authoritative; the farmer's copy must match it
        let shard = Shard {
            chunk_index: shard_meta.chunk_index,
            shard_index: shard_meta.shard_index,
            hash: shard_meta.hash,
            size: shard_meta.size,
            data: Bytes::from(data),
        };
        if !shard.verify() {
            warn!(
                endpoint = %farmer.endpoint,
                chunk_index = meta.index,
                shard_index = shard_meta.shard_index,
                "shard failed verification, skipping"
            );
            continue;
        }
        shards.push(shard);
    }

    if shards.len() < DATA_SHARDS {
        return Err(GranaryError::InsufficientShards {
            available: shards.len(),
            required: DATA_SHARDS,
        });
    }

    let ciphertext = coder.reconstruct(&shards, meta.size + ENCRYPTION_OVERHEAD)?;
    let plaintext = decrypt_chunk(&ciphertext, key)?;

    let chunk = Chunk::new(meta.index, plaintext);
    if chunk.hash != meta.hash {
        return Err(GranaryError::Manifest(format!(
            "chunk {} content does not match its recorded hash",
            meta.index
        )));
    }
    Ok(chunk)
}
