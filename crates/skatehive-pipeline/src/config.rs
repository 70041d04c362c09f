//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use skatehive_media::{ClassifierConfig, ThumbnailConfig};
use skatehive_models::PolicyTable;
use skatehive_storage::UploadConfig;

use crate::error::{PipelineError, PipelineResult};

const MB: u64 = 1024 * 1024;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// FFmpeg binary; `None` looks it up in PATH
    pub ffmpeg_path: Option<PathBuf>,
    /// FFprobe binary; `None` looks it up in PATH
    pub ffprobe_path: Option<PathBuf>,
    /// Parent directory for per-run scratch directories
    pub work_dir: Option<PathBuf>,
    /// Wall-clock limit for one primary transcode
    pub transcode_timeout: Duration,
    /// Time the fallback engine waits for its first decoded frame
    pub fallback_load_timeout: Duration,
    /// Generate and upload a thumbnail
    pub thumbnails_enabled: bool,
    pub classifier: ClassifierConfig,
    pub thumbnail: ThumbnailConfig,
    pub policy: PolicyTable,
    pub upload: UploadConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            work_dir: None,
            transcode_timeout: Duration::from_secs(1800), // 30 minutes
            fallback_load_timeout: Duration::from_secs(15),
            thumbnails_enabled: true,
            classifier: ClassifierConfig::default(),
            thumbnail: ThumbnailConfig::default(),
            policy: PolicyTable::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> PipelineResult<Self> {
        let defaults = Self::default();

        let mut classifier = defaults.classifier.clone();
        if let Some(bytes) = mb_var("SKATEHIVE_REPACK_MAX_MB")? {
            classifier.repack_max_bytes = bytes;
        }
        if let Some(bytes) = mb_var("SKATEHIVE_CONSTRAINED_REPACK_MAX_MB")? {
            classifier.constrained_repack_max_bytes = bytes;
        }

        Ok(Self {
            ffmpeg_path: path_var("SKATEHIVE_FFMPEG_PATH"),
            ffprobe_path: path_var("SKATEHIVE_FFPROBE_PATH"),
            work_dir: path_var("SKATEHIVE_WORK_DIR"),
            transcode_timeout: Duration::from_secs(
                std::env::var("SKATEHIVE_TRANSCODE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            fallback_load_timeout: Duration::from_secs(
                std::env::var("SKATEHIVE_FALLBACK_LOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            ),
            thumbnails_enabled: std::env::var("SKATEHIVE_THUMBNAILS")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "off"))
                .unwrap_or(true),
            classifier,
            thumbnail: defaults.thumbnail,
            policy: defaults.policy,
            upload: UploadConfig::from_env()?,
        })
    }
}

fn mb_var(name: &str) -> PipelineResult<Option<u64>> {
    let Some(mb) = std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok()) else {
        return Ok(None);
    };
    mb.checked_mul(MB)
        .map(Some)
        .ok_or_else(|| PipelineError::config_error(format!("{} is too large: {}", name, mb)))
}

fn path_var(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}
