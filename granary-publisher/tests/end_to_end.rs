//! End-to-end integration tests for Granary
//!
//! Tests the complete pipeline: file → chunks → encrypt → shard → distribute
//! → manifest → fetch → reconstruct → decrypt → file
//!
//! Run with: cargo test --test end_to_end

use granary_core::crypto::ContentHash;
use granary_core::{CHUNK_SIZE, TOTAL_SHARDS};
use granary_manifest::Manifest;
use granary_publisher::{
    FarmerAddr, MemoryFarmerTransport, RetrieveConfig, Retriever, UploadConfig, Uploader,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

/// Generate test file data of specified size
fn generate_file(size: usize) -> Vec<u8> {
    // Use a pattern that's easy to verify
    (0..size).map(|i| (i % 256) as u8).collect()
}

fn farmer_directory(count: usize) -> Vec<FarmerAddr> {
    (0..count)
        .map(|i| {
            FarmerAddr::new(
                format!("0xfarmer{:02}", i),
                format!("http://farmer{}.test", i),
                "eu-central",
            )
        })
        .collect()
}

#[tokio::test]
async fn test_full_pipeline_small_file() {
    run_full_pipeline_test(100 * 1024).await; // 100 KB, single chunk
}

#[tokio::test]
async fn test_full_pipeline_multi_chunk() {
    run_full_pipeline_test(3 * CHUNK_SIZE + 12345).await; // 4 chunks, last partial
}

#[tokio::test]
async fn test_full_pipeline_exact_boundary() {
    run_full_pipeline_test(2 * CHUNK_SIZE).await; // exact chunk boundary
}

async fn run_full_pipeline_test(file_size: usize) {
    // 1. Generate test file
    let original_file = generate_file(file_size);
    let original_hash = ContentHash::compute(&original_file);

    let dir = TempDir::new().unwrap();
    let mut input = tempfile::NamedTempFile::new().unwrap();
    input.write_all(&original_file).unwrap();
    input.flush().unwrap();

    // 2. Publish through the in-memory farmer network
    let transport = Arc::new(MemoryFarmerTransport::new());
    let config = UploadConfig::new(
        input.path(),
        farmer_directory(6),
        "0xpublisher",
        dir.path().join("manifest.json"),
    );
    let outcome = Uploader::new(transport.clone())
        .upload(config)
        .await
        .unwrap();

    let expected_chunks = file_size.div_ceil(CHUNK_SIZE);
    assert_eq!(outcome.manifest.chunk_count, expected_chunks);
    assert_eq!(
        outcome.manifest.shards.len(),
        expected_chunks * TOTAL_SHARDS
    );
    assert_eq!(outcome.manifest.original_file_hash, original_hash);
    assert_eq!(outcome.stats.shards_uploaded, expected_chunks * TOTAL_SHARDS);
    assert!(outcome.stats.errors.is_empty());

    // 3. Retrieve from the saved manifest, as a fresh client would
    let manifest = Manifest::load(dir.path().join("manifest.json")).unwrap();
    let output = dir.path().join("restored.bin");
    Retriever::new(transport)
        .retrieve(&manifest, RetrieveConfig::new(&output))
        .await
        .unwrap();

    // 4. Byte-for-byte identical output
    let restored = std::fs::read(&output).unwrap();
    assert_eq!(restored.len(), original_file.len());
    assert_eq!(restored, original_file);
    assert!(original_hash.verify(&restored));
}

#[tokio::test]
async fn test_pipeline_with_degraded_farmers() {
    // Publish healthy, then lose two farmers before retrieval
    let original_file = generate_file(CHUNK_SIZE + 4096);
    let dir = TempDir::new().unwrap();
    let mut input = tempfile::NamedTempFile::new().unwrap();
    input.write_all(&original_file).unwrap();
    input.flush().unwrap();

    let transport = Arc::new(MemoryFarmerTransport::new());
    let config = UploadConfig::new(
        input.path(),
        farmer_directory(6),
        "0xpublisher",
        dir.path().join("manifest.json"),
    );
    let outcome = Uploader::new(transport.clone())
        .upload(config)
        .await
        .unwrap();

    transport.fail_endpoint("http://farmer0.test");
    transport.fail_endpoint("http://farmer5.test");

    let output = dir.path().join("restored.bin");
    Retriever::new(transport)
        .retrieve(&outcome.manifest, RetrieveConfig::new(&output))
        .await
        .unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), original_file);
}

#[tokio::test]
async fn test_pipeline_fewer_farmers_than_shards() {
    // 3 farmers hold 6 shards each chunk; losing one farmer loses two shards
    let original_file = generate_file(64 * 1024);
    let dir = TempDir::new().unwrap();
    let mut input = tempfile::NamedTempFile::new().unwrap();
    input.write_all(&original_file).unwrap();
    input.flush().unwrap();

    let transport = Arc::new(MemoryFarmerTransport::new());
    let config = UploadConfig::new(
        input.path(),
        farmer_directory(3),
        "0xpublisher",
        dir.path().join("manifest.json"),
    );
    let outcome = Uploader::new(transport.clone())
        .upload(config)
        .await
        .unwrap();

    // Shard i lands on farmer i % 3
    for shard in &outcome.manifest.shards {
        assert_eq!(shard.farmer_index, shard.shard_index as usize % 3);
    }

    transport.fail_endpoint("http://farmer1.test");

    let output = dir.path().join("restored.bin");
    Retriever::new(transport)
        .retrieve(&outcome.manifest, RetrieveConfig::new(&output))
        .await
        .unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), original_file);
}
