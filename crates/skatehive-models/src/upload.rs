//! Upload outcome and thumbnail artifact.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which transfer path produced an upload result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// One multipart request
    Single,
    /// Sequential chunk requests
    Chunked,
    /// Chunked path failed; the single-request path was used instead
    ChunkedFallbackToSingle,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Single => "single",
            TransferMode::Chunked => "chunked",
            TransferMode::ChunkedFallbackToSingle => "chunked_fallback_to_single",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal value of an upload.
///
/// A successful URL is content-addressed and must be treated as permanent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UploadResult {
    pub success: bool,
    /// Gateway URL of the stored content
    pub url: Option<String>,
    /// Content hash returned by the store
    pub hash: Option<String>,
    /// Short human-readable failure description
    pub error: Option<String>,
    pub transfer: TransferMode,
}

impl UploadResult {
    pub fn succeeded(url: impl Into<String>, hash: impl Into<String>, transfer: TransferMode) -> Self {
        Self {
            success: true,
            url: Some(url.into()),
            hash: Some(hash.into()),
            error: None,
            transfer,
        }
    }

    pub fn failed(error: impl Into<String>, transfer: TransferMode) -> Self {
        Self {
            success: false,
            url: None,
            hash: None,
            error: Some(error.into()),
            transfer,
        }
    }
}

/// Still image generated from a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThumbnailArtifact {
    /// Encoded image bytes
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Set once the image has been persisted
    pub remote_url: Option<String>,
}

impl ThumbnailArtifact {
    pub fn jpeg(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            mime_type: "image/jpeg".to_string(),
            width,
            height,
            remote_url: None,
        }
    }

    /// Record where the image was persisted.
    pub fn persisted_at(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }
}
