//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while uploading.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure upload client: {0}")]
    ConfigError(String),

    #[error("Upload endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Upload timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from upload endpoint: {0}")]
    InvalidResponse(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Longest response body carried into an error.
const MAX_BODY_CHARS: usize = 200;

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Non-success status, keeping the start of the response body.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body: String = body.into();
        let body = if body.chars().count() > MAX_BODY_CHARS {
            let mut cut: String = body.chars().take(MAX_BODY_CHARS).collect();
            cut.push_str("...");
            cut
        } else {
            body
        };
        Self::HttpStatus { status, body }
    }

    /// Map a transport error; `timeout_secs` is the limit that applied.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_secs)
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short description suitable for showing to the uploader.
    pub fn user_message(&self) -> String {
        match self {
            Self::HttpStatus { status, body } if body.is_empty() => {
                format!("Upload failed (HTTP {})", status)
            }
            Self::HttpStatus { status, body } => format!("Upload failed (HTTP {}): {}", status, body),
            Self::Timeout(secs) => format!("Upload timed out after {} seconds", secs),
            Self::Network(_) => "Upload failed: network error".to_string(),
            Self::InvalidResponse(_) | Self::Json(_) => {
                "Upload failed: unexpected response from server".to_string()
            }
            Self::Cancelled => "Upload cancelled".to_string(),
            Self::Io(e) => format!("Upload failed: could not read file ({})", e),
            Self::ConfigError(msg) => format!("Upload is not configured: {}", msg),
        }
    }
}
