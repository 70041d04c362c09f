//! Upload manager for the content-addressed store.
//!
//! Files up to the chunk threshold go out as one multipart request. Larger
//! files are sent as sequential base64 JSON chunks; if any chunk fails the
//! whole file is retried once through the single-request path. There is no
//! other retry.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use skatehive_models::{
    DeviceClass, ProgressReporter, Stage, ThumbnailArtifact, TransferMode, UploadResult,
};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::{StorageError, StorageResult};
use crate::metrics;

/// Upload progress stays below 100 until the store has answered.
const MAX_SENDING_PERCENT: f32 = 99.0;

/// File to push to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

impl UploadArtifact {
    pub fn new(
        path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            path: path.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size,
        }
    }

    /// Describe a file on disk, guessing its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let size = tokio::fs::metadata(path).await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self::new(path, file_name, mime_type, size))
    }
}

/// Who is uploading and from what kind of device.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMetadata {
    /// Account name recorded alongside the content
    pub creator: Option<String>,
    /// Chooses the request timeout
    pub device_class: DeviceClass,
}

impl Default for UploadMetadata {
    fn default() -> Self {
        Self {
            creator: None,
            device_class: DeviceClass::Desktop,
        }
    }
}

impl UploadMetadata {
    pub fn new(creator: Option<String>, device_class: DeviceClass) -> Self {
        Self {
            creator,
            device_class,
        }
    }
}

/// Response body of both endpoints; stores disagree on the hash field name.
#[derive(Debug, Default, Deserialize)]
struct StoreResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: Option<String>,
    hash: Option<String>,
    cid: Option<String>,
}

impl StoreResponse {
    fn into_hash(self) -> Option<String> {
        self.ipfs_hash
            .or(self.hash)
            .or(self.cid)
            .filter(|h| !h.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRequest<'a> {
    file_name: &'a str,
    file_type: &'a str,
    creator: Option<&'a str>,
    total_size: u64,
    /// Base64 of this chunk's bytes
    chunk: String,
    chunk_index: u64,
    total_chunks: u64,
}

fn percent(sent: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((sent as f64 / total as f64) * 100.0) as f32
}

/// Pushes artifacts to the content-addressed store.
#[derive(Debug, Clone)]
pub struct UploadManager {
    http: Client,
    config: UploadConfig,
}

impl UploadManager {
    /// Create a manager with its own HTTP client.
    pub fn new(config: UploadConfig) -> StorageResult<Self> {
        config.validate()?;
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("skatehive-storage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::config_error(format!("HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Create a manager from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(UploadConfig::from_env()?)
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload a file and describe the outcome.
    ///
    /// Never fails: errors are carried in [`UploadResult::error`] as a short
    /// message fit for the uploader.
    pub async fn upload(
        &self,
        artifact: &UploadArtifact,
        metadata: &UploadMetadata,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> UploadResult {
        let started = Instant::now();
        progress.begin(Stage::Uploading);

        let (transfer, result) = self.transfer(artifact, metadata, progress, cancel).await;
        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_upload(transfer, result.is_ok(), artifact.size, elapsed);

        match result {
            Ok(hash) => {
                progress.finish(Stage::Uploading);
                let url = self.config.gateway_url_for(&hash);
                info!(
                    file = %artifact.file_name,
                    size = artifact.size,
                    transfer = %transfer,
                    hash = %hash,
                    elapsed_secs = elapsed,
                    "Upload complete"
                );
                UploadResult::succeeded(url, hash, transfer)
            }
            Err(e) => {
                warn!(
                    file = %artifact.file_name,
                    transfer = %transfer,
                    error = %e,
                    "Upload failed"
                );
                UploadResult::failed(e.user_message(), transfer)
            }
        }
    }

    /// Upload a generated thumbnail through the single-request endpoint.
    pub async fn upload_thumbnail(
        &self,
        thumbnail: &ThumbnailArtifact,
        metadata: &UploadMetadata,
        cancel: &CancellationToken,
    ) -> UploadResult {
        let result = self.send_thumbnail(thumbnail, metadata, cancel).await;
        match result {
            Ok(hash) => {
                debug!(hash = %hash, bytes = thumbnail.bytes.len(), "Thumbnail uploaded");
                UploadResult::succeeded(self.config.gateway_url_for(&hash), hash, TransferMode::Single)
            }
            Err(e) => {
                warn!(error = %e, "Thumbnail upload failed");
                UploadResult::failed(e.user_message(), TransferMode::Single)
            }
        }
    }

    async fn send_thumbnail(
        &self,
        thumbnail: &ThumbnailArtifact,
        metadata: &UploadMetadata,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let extension = match thumbnail.mime_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        };
        let part = Part::bytes(thumbnail.bytes.clone())
            .file_name(format!("thumbnail.{}", extension))
            .mime_str(&thumbnail.mime_type)
            .map_err(|e| StorageError::config_error(format!("MIME type: {}", e)))?;
        self.post_multipart(part, metadata, cancel).await
    }

    async fn transfer(
        &self,
        artifact: &UploadArtifact,
        metadata: &UploadMetadata,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> (TransferMode, StorageResult<String>) {
        if artifact.size <= self.config.chunk_threshold_bytes {
            let result = self.upload_single(artifact, metadata, progress, cancel).await;
            return (TransferMode::Single, result);
        }

        match self.upload_chunked(artifact, metadata, progress, cancel).await {
            Ok(hash) => (TransferMode::Chunked, Ok(hash)),
            Err(e) if e.is_cancelled() => (TransferMode::Chunked, Err(e)),
            Err(e) => {
                warn!(
                    file = %artifact.file_name,
                    size = artifact.size,
                    error = %e,
                    "Chunked upload failed, falling back to single request"
                );
                metrics::record_chunk_fallback();
                let result = self.upload_single(artifact, metadata, progress, cancel).await;
                (TransferMode::ChunkedFallbackToSingle, result)
            }
        }
    }

    /// One multipart request with the file streamed from disk.
    async fn upload_single(
        &self,
        artifact: &UploadArtifact,
        metadata: &UploadMetadata,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let file = tokio::fs::File::open(&artifact.path).await?;
        let total = artifact.size;
        let reporter = progress.clone();
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                reporter.report(Stage::Uploading, percent(sent, total).min(MAX_SENDING_PERCENT));
            }
            chunk
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(artifact.file_name.clone())
            .mime_str(&artifact.mime_type)
            .map_err(|e| StorageError::config_error(format!("MIME type: {}", e)))?;

        debug!(file = %artifact.file_name, size = total, "Sending single-request upload");
        self.post_multipart(part, metadata, cancel).await
    }

    async fn post_multipart(
        &self,
        file_part: Part,
        metadata: &UploadMetadata,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let mut form = Form::new().part("file", file_part);
        if let Some(creator) = &metadata.creator {
            form = form.text("creator", creator.clone());
        }

        let timeout = self.config.timeout_for(metadata.device_class);
        let request = self
            .http
            .post(self.config.upload_url.clone())
            .timeout(timeout)
            .multipart(form);

        let response = self.send(request, timeout, cancel).await?;
        let body = self.read_body(response, timeout, cancel).await?;
        parse_store_response(&body)?
            .into_hash()
            .ok_or_else(|| StorageError::invalid_response("response has no content hash"))
    }

    /// Sequential base64 chunks; the hash comes back with the final chunk.
    async fn upload_chunked(
        &self,
        artifact: &UploadArtifact,
        metadata: &UploadMetadata,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let chunk_size = self.config.chunk_size_bytes;
        let total_chunks = self.config.chunk_count(artifact.size);
        let timeout = self.config.timeout_for(metadata.device_class);

        info!(
            file = %artifact.file_name,
            size = artifact.size,
            total_chunks,
            "Starting chunked upload"
        );

        let mut file = tokio::fs::File::open(&artifact.path).await?;
        let mut buffer = vec![0u8; chunk_size as usize];
        let mut sent = 0u64;
        let mut hash = None;

        for index in 0..total_chunks {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }

            let len = (artifact.size - sent).min(chunk_size) as usize;
            file.read_exact(&mut buffer[..len]).await?;

            let body = ChunkRequest {
                file_name: &artifact.file_name,
                file_type: &artifact.mime_type,
                creator: metadata.creator.as_deref(),
                total_size: artifact.size,
                chunk: STANDARD.encode(&buffer[..len]),
                chunk_index: index,
                total_chunks,
            };
            let request = self
                .http
                .post(self.config.chunk_url.clone())
                .timeout(timeout)
                .json(&body);

            let response = self.send(request, timeout, cancel).await?;
            let text = self.read_body(response, timeout, cancel).await?;

            // Intermediate acknowledgements are free-form
            if let Some(h) = serde_json::from_str::<StoreResponse>(&text)
                .ok()
                .and_then(StoreResponse::into_hash)
            {
                hash = Some(h);
            }

            sent += len as u64;
            debug!(chunk = index + 1, total_chunks, sent, "Chunk accepted");
            progress.report(
                Stage::Uploading,
                percent(sent, artifact.size).min(MAX_SENDING_PERCENT),
            );
        }

        hash.ok_or_else(|| {
            StorageError::invalid_response("chunked upload finished without a content hash")
        })
    }

    async fn send(
        &self,
        request: RequestBuilder,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> StorageResult<Response> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            result = request.send() => {
                result.map_err(|e| StorageError::from_reqwest(e, timeout.as_secs()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_http_status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn read_body(
        &self,
        response: Response,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            result = response.text() => {
                result.map_err(|e| StorageError::from_reqwest(e, timeout.as_secs()))
            }
        }
    }
}

fn parse_store_response(body: &str) -> StorageResult<StoreResponse> {
    serde_json::from_str(body).map_err(|e| {
        StorageError::invalid_response(format!("expected JSON with a content hash: {}", e))
    })
}
