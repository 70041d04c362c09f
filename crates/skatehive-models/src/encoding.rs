//! Video encoding profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Delivery video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Delivery audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Constant frame rate every transcode is normalized to
pub const TARGET_FRAME_RATE: u32 = 30;

/// Standard tier settings
pub const STANDARD_CRF: u8 = 23;
pub const STANDARD_PRESET: &str = "medium";
pub const STANDARD_AUDIO_BITRATE: &str = "128k";
pub const STANDARD_MAX_DIMENSION: u32 = 1920;

/// Constrained (older mobile) tier settings
pub const CONSTRAINED_CRF: u8 = 28;
pub const CONSTRAINED_PRESET: &str = "veryfast";
pub const CONSTRAINED_AUDIO_BITRATE: &str = "96k";
pub const CONSTRAINED_MAX_DIMENSION: u32 = 1280;

/// Thumbnail canvas (landscape orientation)
pub const THUMBNAIL_WIDTH: u32 = 640;
pub const THUMBNAIL_HEIGHT: u32 = 360;
pub const THUMBNAIL_JPEG_QUALITY: u8 = 82;

/// Encoding profile for the primary engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingProfile {
    /// Video codec (e.g., "libx264")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "veryfast", "medium")
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    pub crf: u8,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate
    pub audio_bitrate: String,

    /// Output width bound in pixels
    pub max_width: u32,

    /// Output height bound in pixels
    pub max_height: u32,

    /// Constant output frame rate
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_frame_rate() -> u32 {
    TARGET_FRAME_RATE
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl EncodingProfile {
    /// Profile for capable devices.
    pub fn standard() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: STANDARD_PRESET.to_string(),
            crf: STANDARD_CRF,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: STANDARD_AUDIO_BITRATE.to_string(),
            max_width: STANDARD_MAX_DIMENSION,
            max_height: STANDARD_MAX_DIMENSION,
            frame_rate: TARGET_FRAME_RATE,
        }
    }

    /// More aggressive compression for constrained devices.
    pub fn constrained() -> Self {
        Self {
            preset: CONSTRAINED_PRESET.to_string(),
            crf: CONSTRAINED_CRF,
            audio_bitrate: CONSTRAINED_AUDIO_BITRATE.to_string(),
            max_width: CONSTRAINED_MAX_DIMENSION,
            max_height: CONSTRAINED_MAX_DIMENSION,
            ..Self::standard()
        }
    }

    /// Pick the profile matching a device tier.
    pub fn for_constrained(constrained: bool) -> Self {
        if constrained {
            Self::constrained()
        } else {
            Self::standard()
        }
    }

    /// Downscale-only, aspect-preserving scale filter followed by the
    /// constant frame rate filter.
    pub fn video_filter(&self) -> String {
        format!(
            "scale='min(iw,{w})':'min(ih,{h})':force_original_aspect_ratio=decrease:force_divisible_by=2,fps={fps}",
            w = self.max_width,
            h = self.max_height,
            fps = self.frame_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_profile() {
        let profile = EncodingProfile::default();
        assert_eq!(profile.codec, "libx264");
        assert_eq!(profile.crf, 23);
        assert_eq!(profile.frame_rate, 30);
    }

    #[test]
    fn test_constrained_is_more_conservative() {
        let standard = EncodingProfile::standard();
        let constrained = EncodingProfile::constrained();
        assert!(constrained.crf > standard.crf);
        assert!(constrained.max_height < standard.max_height);
        assert_eq!(constrained.codec, standard.codec);
    }

    #[test]
    fn test_video_filter_never_upscales() {
        let filter = EncodingProfile::standard().video_filter();
        assert!(filter.contains("min(iw,1920)"));
        assert!(filter.contains("min(ih,1920)"));
        assert!(filter.contains("force_original_aspect_ratio=decrease"));
        assert!(filter.ends_with("fps=30"));
    }
}
