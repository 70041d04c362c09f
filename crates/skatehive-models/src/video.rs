//! Observed video properties.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Best-effort metadata of a decoded video.
///
/// Any field may be `None`; that is an expected outcome of probing, not an
/// error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration_secs: Option<f64>,
    /// Width in pixels
    pub width: Option<u32>,
    /// Height in pixels
    pub height: Option<u32>,
    /// Approximate frame rate (fps)
    pub frame_rate: Option<f64>,
    /// Approximate bitrate in bits/second
    pub bitrate: Option<u64>,
    /// Whether an audio stream is present
    pub has_audio: Option<bool>,
    /// Video codec guess (e.g. "h264", "hevc")
    pub codec: Option<String>,
    /// Container format names as reported by the demuxer
    pub container: Option<String>,
}

impl VideoMetadata {
    /// Metadata with every field unknown.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Pixel dimensions when both are known and non-zero.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    /// Whether the video is taller than it is wide.
    pub fn is_portrait(&self) -> bool {
        self.dimensions().map(|(w, h)| h > w).unwrap_or(false)
    }

    /// Duration in milliseconds when known and positive.
    pub fn duration_ms(&self) -> Option<i64> {
        self.duration_secs
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * 1000.0) as i64)
    }
}
