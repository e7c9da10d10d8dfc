//! Streaming chunker
//!
//! Splits a byte source into ordered, fixed-size chunks without buffering the
//! whole source in memory. A spawned reader task feeds a bounded channel
//! (CHUNK_LOOKAHEAD pending chunks), so downstream encryption/sharding can
//! overlap with source reads.
//!
//! Contract:
//! - chunk indices are strictly increasing from 0
//! - every chunk is exactly CHUNK_SIZE bytes except possibly the last
//! - an empty source yields an empty stream, not one empty chunk
//! - a read failure surfaces as a terminal `Err` on the stream; chunks
//!   already delivered stay valid

use crate::chunk::Chunk;
use crate::error::Result;
use crate::{CHUNK_LOOKAHEAD, CHUNK_SIZE};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Receiving end of a chunk pipeline
pub type ChunkStream = mpsc::Receiver<Result<Chunk>>;

/// Stream chunks from an async byte source
pub fn stream_chunks<R>(reader: R) -> ChunkStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHUNK_LOOKAHEAD);
    tokio::spawn(async move {
        produce_chunks(reader, tx).await;
    });
    rx
}

/// Stream chunks from a file path
///
/// An open failure surfaces as the first (and only) stream event.
pub fn stream_file(path: impl Into<PathBuf>) -> ChunkStream {
    let path = path.into();
    let (tx, rx) = mpsc::channel(CHUNK_LOOKAHEAD);
    tokio::spawn(async move {
        match tokio::fs::File::open(&path).await {
            Ok(file) => produce_chunks(file, tx).await,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
            }
        }
    });
    rx
}

async fn produce_chunks<R>(mut reader: R, tx: mpsc::Sender<Result<Chunk>>)
where
    R: AsyncRead + Unpin,
{
    let mut index: u32 = 0;

    loop {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;

        // Fill one chunk buffer, tolerating short reads
        while filled < CHUNK_SIZE {
            match reader.read(&mut buffer[filled..]).await {
                Ok(0) => break, // EOF
                Ok(n) => filled += n,
                Err(e) => {
                    // Terminal error event; already-delivered chunks stay valid
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            }
        }

        if filled == 0 {
            // Empty source, or EOF exactly on a chunk boundary
            return;
        }

        buffer.truncate(filled);
        let chunk = Chunk::new(index, buffer);
        if tx.send(Ok(chunk)).await.is_err() {
            // Consumer dropped the stream
            return;
        }
        index += 1;

        if filled < CHUNK_SIZE {
            // Partial chunk is always the last
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ContentHash;
    use std::io::Write;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    async fn collect(mut stream: ChunkStream) -> Vec<Result<Chunk>> {
        let mut out = Vec::new();
        while let Some(item) = stream.recv().await {
            out.push(item);
        }
        out
    }

    fn temp_file_with(size: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    #[tokio::test]
    async fn test_small_file_single_chunk() {
        let (file, data) = temp_file_with(100);
        let chunks = collect(stream_file(file.path())).await;

        assert_eq!(chunks.len(), 1);
        let chunk = chunks[0].as_ref().unwrap();
        assert_eq!(chunk.index, 0);
        assert_eq!(chunk.size, 100);
        assert_eq!(chunk.data.as_ref(), data.as_slice());
        assert_eq!(chunk.hash, ContentHash::compute(&data));
    }

    #[tokio::test]
    async fn test_exact_chunk_boundary() {
        let (file, _) = temp_file_with(CHUNK_SIZE);
        let chunks = collect(stream_file(file.path())).await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().size, CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_multiple_full_chunks() {
        let (file, _) = temp_file_with(5 * CHUNK_SIZE);
        let chunks = collect(stream_file(file.path())).await;

        assert_eq!(chunks.len(), 5);
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk = chunk.as_ref().unwrap();
            assert_eq!(chunk.index, i as u32);
            assert_eq!(chunk.size, CHUNK_SIZE);
        }
    }

    #[tokio::test]
    async fn test_partial_last_chunk() {
        let (file, _) = temp_file_with(3 * CHUNK_SIZE + CHUNK_SIZE / 2);
        let chunks = collect(stream_file(file.path())).await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].as_ref().unwrap().size, 524_288);
    }

    #[tokio::test]
    async fn test_empty_source_yields_no_chunks() {
        let (file, _) = temp_file_with(0);
        let chunks = collect(stream_file(file.path())).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_surfaces_error() {
        let chunks = collect(stream_file("/nonexistent/granary-test-file")).await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_err());
    }

    /// Reader that yields `good` bytes, then fails
    struct FailingReader {
        good: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.pos < self.good.len() {
                let n = (self.good.len() - self.pos).min(buf.remaining());
                buf.put_slice(&self.good[self.pos..self.pos + n]);
                self.pos += n;
                Poll::Ready(Ok(()))
            } else {
                Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "device failure",
                )))
            }
        }
    }

    #[tokio::test]
    async fn test_read_failure_is_terminal_after_good_chunks() {
        let reader = FailingReader {
            good: vec![1u8; CHUNK_SIZE + 10],
            pos: 0,
        };
        let chunks = collect(stream_chunks(reader)).await;

        // One full chunk delivered, then the terminal error
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert_eq!(chunks[0].as_ref().unwrap().size, CHUNK_SIZE);
        assert!(chunks[1].is_err());
    }
}
