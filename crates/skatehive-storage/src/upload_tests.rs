//! Tests for the upload manager against a mock store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use skatehive_models::{
    DeviceClass, ProgressEvent, ProgressReporter, Stage, ThumbnailArtifact, TransferMode,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::UploadConfig;
use crate::error::StorageError;
use crate::upload::{UploadArtifact, UploadManager, UploadMetadata};

// =============================================================================
// Test Helpers
// =============================================================================

const THRESHOLD: u64 = 1000;
const CHUNK: u64 = 256;

fn manager(server: &MockServer) -> UploadManager {
    let mut config = UploadConfig::default()
        .with_base_url(&format!("{}/api", server.uri()))
        .unwrap();
    config.chunk_threshold_bytes = THRESHOLD;
    config.chunk_size_bytes = CHUNK;
    config.gateway_url = "https://gateway.test/ipfs/".to_string();
    UploadManager::new(config).unwrap()
}

async fn artifact(dir: &TempDir, size: u64) -> UploadArtifact {
    let path = dir.path().join("kickflip.mp4");
    let bytes: Vec<u8> = (0..size).map(|i| b'a' + (i % 26) as u8).collect();
    tokio::fs::write(&path, bytes).await.unwrap();
    UploadArtifact::from_path(&path).await.unwrap()
}

fn metadata() -> UploadMetadata {
    UploadMetadata::new(Some("skater".to_string()), DeviceClass::Mobile)
}

fn recording() -> (ProgressReporter, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let reporter = ProgressReporter::new(move |e| sink.lock().unwrap().push(e));
    (reporter, events)
}

async fn requests_to(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .count()
}

// =============================================================================
// Transfer Path Selection
// =============================================================================

#[tokio::test]
async fn test_at_threshold_uses_single_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .and(body_string_contains("name=\"creator\""))
        .and(body_string_contains("filename=\"kickflip.mp4\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"IpfsHash": "QmSingle"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, THRESHOLD).await;
    let result = manager(&server)
        .upload(&file, &metadata(), &ProgressReporter::noop(), &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.transfer, TransferMode::Single);
    assert_eq!(result.hash.as_deref(), Some("QmSingle"));
    assert_eq!(result.url.as_deref(), Some("https://gateway.test/ipfs/QmSingle"));
    assert_eq!(requests_to(&server, "/api/upload-chunk").await, 0);
}

#[tokio::test]
async fn test_above_threshold_uses_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload-chunk"))
        .and(body_string_contains("\"fileName\":\"kickflip.mp4\""))
        .and(body_string_contains("\"totalChunks\":4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cid": "bafyChunked"})))
        .expect(4)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, THRESHOLD + 1).await;
    let (reporter, events) = recording();
    let result = manager(&server)
        .upload(&file, &metadata(), &reporter, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.transfer, TransferMode::Chunked);
    assert_eq!(result.hash.as_deref(), Some("bafyChunked"));
    assert_eq!(requests_to(&server, "/api/upload").await, 0);

    let events = events.lock().unwrap();
    assert!(events.iter().all(|e| e.stage == Stage::Uploading));
    assert!(events.windows(2).all(|w| w[0].percent < w[1].percent));
    assert_eq!(events.last().unwrap().percent, 100.0);
}

#[tokio::test]
async fn test_chunks_are_sent_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload-chunk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hash": "QmOrdered"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, 4 * CHUNK + 10).await;
    let result = manager(&server)
        .upload(&file, &metadata(), &ProgressReporter::noop(), &CancellationToken::new())
        .await;
    assert!(result.success);

    let requests = server.received_requests().await.unwrap();
    let bodies: Vec<serde_json::Value> = requests
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    let indices: Vec<u64> = bodies
        .iter()
        .map(|b| b["chunkIndex"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(bodies[0]["totalSize"], 4 * CHUNK + 10);
    assert_eq!(bodies[0]["fileType"], "video/mp4");
    assert_eq!(bodies[0]["creator"], "skater");
}

#[tokio::test]
async fn test_chunk_failure_falls_back_to_single() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload-chunk"))
        .respond_with(ResponseTemplate::new(500).set_body_string("chunk store down"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"IpfsHash": "QmFallback"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, THRESHOLD + 1).await;
    let result = manager(&server)
        .upload(&file, &metadata(), &ProgressReporter::noop(), &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.transfer, TransferMode::ChunkedFallbackToSingle);
    assert_eq!(result.url.as_deref(), Some("https://gateway.test/ipfs/QmFallback"));
}

#[tokio::test]
async fn test_chunked_without_hash_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload-chunk"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hash": "QmRecovered"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, THRESHOLD + 1).await;
    let result = manager(&server)
        .upload(&file, &metadata(), &ProgressReporter::noop(), &CancellationToken::new())
        .await;

    assert!(result.success);
    assert_eq!(result.transfer, TransferMode::ChunkedFallbackToSingle);
    assert_eq!(result.hash.as_deref(), Some("QmRecovered"));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_single_failure_reports_status_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(413).set_body_string("payload too large"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, 100).await;
    let result = manager(&server)
        .upload(&file, &metadata(), &ProgressReporter::noop(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert!(result.url.is_none());
    assert_eq!(
        result.error.as_deref(),
        Some("Upload failed (HTTP 413): payload too large")
    );
}

#[tokio::test]
async fn test_slow_store_times_out_for_mobile() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "IpfsHash": "QmSlow" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut config = UploadConfig::default()
        .with_base_url(&format!("{}/api", server.uri()))
        .unwrap();
    config.mobile_timeout = Duration::from_secs(1);
    config.desktop_timeout = Duration::from_secs(30);
    let manager = UploadManager::new(config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, 100).await;
    let result = manager
        .upload(&file, &metadata(), &ProgressReporter::noop(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert!(result.url.is_none());
    assert_eq!(result.transfer, TransferMode::Single);
    assert_eq!(
        result.error.as_deref(),
        Some("Upload timed out after 1 seconds")
    );
}

#[test]
fn test_oversized_chunks_are_rejected() {
    let config = UploadConfig {
        chunk_size_bytes: crate::config::MAX_CHUNK_BYTES + 1,
        ..UploadConfig::default()
    };
    assert!(matches!(
        UploadManager::new(config),
        Err(StorageError::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_fallback_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload-chunk"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, THRESHOLD + 1).await;
    let result = manager(&server)
        .upload(&file, &metadata(), &ProgressReporter::noop(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.transfer, TransferMode::ChunkedFallbackToSingle);
    assert_eq!(result.error.as_deref(), Some("Upload failed (HTTP 503)"));
}

#[tokio::test]
async fn test_missing_hash_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "pinned"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, 100).await;
    let result = manager(&server)
        .upload(&file, &metadata(), &ProgressReporter::noop(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Upload failed: unexpected response from server")
    );
}

#[tokio::test]
async fn test_cancelled_upload_does_not_fall_back() {
    let server = MockServer::start().await;

    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, THRESHOLD + 1).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = manager(&server)
        .upload(&file, &metadata(), &ProgressReporter::noop(), &cancel)
        .await;

    assert!(!result.success);
    assert_eq!(result.transfer, TransferMode::Chunked);
    assert_eq!(result.error.as_deref(), Some("Upload cancelled"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

// =============================================================================
// Thumbnails
// =============================================================================

#[tokio::test]
async fn test_thumbnail_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"IpfsHash": "QmThumb"})))
        .expect(1)
        .mount(&server)
        .await;

    let thumb = ThumbnailArtifact::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], 640, 360);
    let result = manager(&server)
        .upload_thumbnail(&thumb, &UploadMetadata::default(), &CancellationToken::new())
        .await;

    assert!(result.success);
    assert_eq!(result.url.as_deref(), Some("https://gateway.test/ipfs/QmThumb"));

    // Image bytes are not UTF-8, so inspect the body lossily
    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("filename=\"thumbnail.jpg\""));
    assert!(body.contains("image/jpeg"));
}
