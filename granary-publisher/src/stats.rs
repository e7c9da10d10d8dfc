//! Upload statistics
//!
//! Counters are accumulated by concurrent workers during one orchestration
//! run (atomics for the counts, a guarded list for non-fatal errors), then
//! finalized into an immutable [`UploadStats`] snapshot.

use granary_core::error::GranaryError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Live counters for one upload run
///
/// Owned exclusively by one orchestration run; shared across its workers.
pub struct StatsCollector {
    chunks_processed: AtomicUsize,
    shards_created: AtomicUsize,
    shards_uploaded: AtomicUsize,
    bytes_uploaded: AtomicU64,
    started_at: Instant,
    errors: Mutex<Vec<GranaryError>>,
}

impl StatsCollector {
    /// Start collecting; records the start time
    pub fn start() -> Self {
        Self {
            chunks_processed: AtomicUsize::new(0),
            shards_created: AtomicUsize::new(0),
            shards_uploaded: AtomicUsize::new(0),
            bytes_uploaded: AtomicU64::new(0),
            started_at: Instant::now(),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn record_chunk_processed(&self) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shards_created(&self, count: usize) {
        self.shards_created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_shard_uploaded(&self, bytes: u64) {
        self.shards_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a non-fatal error; the run continues
    pub fn record_error(&self, error: GranaryError) {
        self.errors.lock().push(error);
    }

    pub fn shards_uploaded(&self) -> usize {
        self.shards_uploaded.load(Ordering::Relaxed)
    }

    /// Freeze the counters into a final snapshot
    pub fn finalize(&self) -> UploadStats {
        UploadStats {
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            shards_created: self.shards_created.load(Ordering::Relaxed),
            shards_uploaded: self.shards_uploaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            elapsed: self.started_at.elapsed(),
            errors: std::mem::take(&mut *self.errors.lock()),
        }
    }
}

/// Final statistics for one upload run
#[derive(Debug)]
pub struct UploadStats {
    /// Total chunks processed (chunked, encrypted, sharded)
    pub chunks_processed: usize,
    /// Total shards created
    pub shards_created: usize,
    /// Total shards confirmed by farmers
    pub shards_uploaded: usize,
    /// Total shard bytes confirmed by farmers
    pub bytes_uploaded: u64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Non-fatal errors collected along the way
    pub errors: Vec<GranaryError>,
}

impl UploadStats {
    /// One-line summary for logging
    pub fn summary(&self) -> String {
        format!(
            "{} chunks, {}/{} shards uploaded, {} bytes in {:?} ({} non-fatal errors)",
            self.chunks_processed,
            self.shards_uploaded,
            self.shards_created,
            self.bytes_uploaded,
            self.elapsed,
            self.errors.len()
        )
    }
}
