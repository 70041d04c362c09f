//! Upload configuration.

use std::time::Duration;

use skatehive_models::DeviceClass;
use url::Url;

use crate::error::{StorageError, StorageResult};

const MB: u64 = 1024 * 1024;

/// Largest chunk accepted; each chunk is held in memory while encoded.
pub const MAX_CHUNK_BYTES: u64 = 64 * MB;

pub const DEFAULT_UPLOAD_URL: &str = "https://ipfs.skatehive.app/api/upload";
pub const DEFAULT_CHUNK_URL: &str = "https://ipfs.skatehive.app/api/upload-chunk";
pub const DEFAULT_GATEWAY_URL: &str = "https://ipfs.skatehive.app/ipfs/";

/// Upload endpoints, chunking and timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Multipart single-request endpoint
    pub upload_url: Url,
    /// JSON chunk endpoint
    pub chunk_url: Url,
    /// Prefix the content hash is appended to
    pub gateway_url: String,
    /// Files larger than this go through the chunk endpoint first
    pub chunk_threshold_bytes: u64,
    pub chunk_size_bytes: u64,
    /// Per-request timeout for mobile callers
    pub mobile_timeout: Duration,
    /// Per-request timeout for desktop callers
    pub desktop_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_url: Url::parse(DEFAULT_UPLOAD_URL).expect("default upload URL is valid"),
            chunk_url: Url::parse(DEFAULT_CHUNK_URL).expect("default chunk URL is valid"),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            chunk_threshold_bytes: 50 * MB,
            chunk_size_bytes: 5 * MB,
            mobile_timeout: Duration::from_secs(600),
            desktop_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl UploadConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let defaults = Self::default();

        let upload_url = url_var("SKATEHIVE_UPLOAD_URL")?.unwrap_or(defaults.upload_url);
        let chunk_url = url_var("SKATEHIVE_UPLOAD_CHUNK_URL")?.unwrap_or(defaults.chunk_url);
        let gateway_url = std::env::var("SKATEHIVE_GATEWAY_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.gateway_url);

        let config = Self {
            upload_url,
            chunk_url,
            gateway_url,
            chunk_threshold_bytes: mb_var("SKATEHIVE_UPLOAD_CHUNK_THRESHOLD_MB")?
                .unwrap_or(defaults.chunk_threshold_bytes),
            chunk_size_bytes: mb_var("SKATEHIVE_UPLOAD_CHUNK_MB")?
                .unwrap_or(defaults.chunk_size_bytes),
            mobile_timeout: secs_var("SKATEHIVE_UPLOAD_MOBILE_TIMEOUT_SECS")
                .unwrap_or(defaults.mobile_timeout),
            desktop_timeout: secs_var("SKATEHIVE_UPLOAD_DESKTOP_TIMEOUT_SECS")
                .unwrap_or(defaults.desktop_timeout),
            connect_timeout: secs_var("SKATEHIVE_UPLOAD_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that chunks are non-empty and small enough to hold in memory.
    pub fn validate(&self) -> StorageResult<()> {
        if self.chunk_size_bytes == 0 {
            return Err(StorageError::config_error(
                "chunk size must be greater than zero",
            ));
        }
        if self.chunk_size_bytes > MAX_CHUNK_BYTES {
            return Err(StorageError::config_error(format!(
                "chunk size must be at most {}MB",
                MAX_CHUNK_BYTES / MB
            )));
        }
        Ok(())
    }

    /// Point both endpoints at `base` (`/upload` and `/upload-chunk`).
    pub fn with_base_url(mut self, base: &str) -> StorageResult<Self> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        let base = Url::parse(&base)
            .map_err(|e| StorageError::config_error(format!("invalid base URL {}: {}", base, e)))?;
        self.upload_url = join(&base, "upload")?;
        self.chunk_url = join(&base, "upload-chunk")?;
        Ok(self)
    }

    pub fn timeout_for(&self, class: DeviceClass) -> Duration {
        match class {
            DeviceClass::Mobile => self.mobile_timeout,
            DeviceClass::Desktop => self.desktop_timeout,
        }
    }

    /// Number of chunks a file of `size` bytes is split into.
    pub fn chunk_count(&self, size: u64) -> u64 {
        size.div_ceil(self.chunk_size_bytes).max(1)
    }

    /// Retrieval URL for a content hash.
    pub fn gateway_url_for(&self, hash: &str) -> String {
        format!("{}{}", self.gateway_url, hash)
    }
}

fn join(base: &Url, path: &str) -> StorageResult<Url> {
    base.join(path)
        .map_err(|e| StorageError::config_error(format!("invalid endpoint {}: {}", path, e)))
}

fn url_var(name: &str) -> StorageResult<Option<Url>> {
    match std::env::var(name) {
        Ok(s) if !s.trim().is_empty() => Url::parse(s.trim())
            .map(Some)
            .map_err(|e| StorageError::config_error(format!("{} is not a valid URL: {}", name, e))),
        _ => Ok(None),
    }
}

/// Megabyte count from `name`, in bytes. Values that overflow are rejected.
fn mb_var(name: &str) -> StorageResult<Option<u64>> {
    let Some(mb) = std::env::var(name).ok().and_then(|s| s.trim().parse::<u64>().ok()) else {
        return Ok(None);
    };
    mb.checked_mul(MB)
        .map(Some)
        .ok_or_else(|| StorageError::config_error(format!("{} is too large: {}", name, mb)))
}

fn secs_var(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}
