//! Chunk assembler
//!
//! Consumes chunks in any arrival order (parallel retrieval) and writes each
//! at its absolute offset `index * CHUNK_SIZE` in the output file. Duplicate
//! deliveries of the same index are ignored; after the stream ends the output
//! is only valid if every expected index was written exactly once.

use crate::chunk::Chunk;
use crate::error::{GranaryError, Result};
use crate::CHUNK_SIZE;
use std::path::Path;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::mpsc;

/// Drain `chunks` into the file at `output_path`
///
/// Fails with `ChunkOutOfBounds` on an index outside `[0, total_chunks)` and
/// with `IncompleteAssembly` if the stream ends before every index arrived.
/// On failure the partially written output must not be treated as a result.
pub async fn assemble_chunks(
    mut chunks: mpsc::Receiver<Chunk>,
    output_path: impl AsRef<Path>,
    total_chunks: usize,
) -> Result<()> {
    let mut output = tokio::fs::File::create(output_path).await?;

    // Track received indices to prevent holes in the output
    let mut received = vec![false; total_chunks];
    let mut unique_count = 0;

    while let Some(chunk) = chunks.recv().await {
        let index = chunk.index as usize;
        if index >= total_chunks {
            return Err(GranaryError::ChunkOutOfBounds {
                index: chunk.index,
                max: total_chunks.saturating_sub(1) as u32,
            });
        }

        // Idempotent re-delivery (e.g. retry duplicates)
        if received[index] {
            continue;
        }

        let offset = chunk.index as u64 * CHUNK_SIZE as u64;
        output.seek(SeekFrom::Start(offset)).await?;
        output.write_all(&chunk.data).await?;

        received[index] = true;
        unique_count += 1;
    }

    output.flush().await?;

    if unique_count != total_chunks {
        return Err(GranaryError::IncompleteAssembly {
            expected: total_chunks,
            received: unique_count,
        });
    }

    Ok(())
}
