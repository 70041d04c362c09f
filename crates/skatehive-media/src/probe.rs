//! FFprobe video information.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use skatehive_models::VideoMetadata;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::collect_output;
use crate::error::{MediaError, MediaResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads container metadata from a video file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Probe `path`. Callers treat failures as "metadata unknown".
    async fn probe(&self, path: &Path, cancel: &CancellationToken) -> MediaResult<VideoMetadata>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
    #[serde(default)]
    tags: Option<FfprobeTags>,
}

/// Display matrix side data; `rotation` is in degrees, e.g. -90.
#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

/// Legacy container tags; `rotate` is a string such as "90".
#[derive(Debug, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

impl FfprobeStream {
    /// Clockwise display rotation normalized to 0, 90, 180 or 270.
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .filter(|d| d.is_finite())
            .unwrap_or(0.0);
        let quarter_turns = (degrees / 90.0).round() as i64;
        (quarter_turns.rem_euclid(4) * 90) as u32
    }

    /// Width and height as displayed, after applying rotation.
    fn display_dimensions(&self) -> (Option<u32>, Option<u32>) {
        let width = self.width.filter(|w| *w > 0);
        let height = self.height.filter(|h| *h > 0);
        match self.rotation() {
            90 | 270 => (height, width),
            _ => (width, height),
        }
    }
}

/// [`MediaProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProbe {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path, cancel: &CancellationToken) -> MediaResult<VideoMetadata> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let mut command = Command::new(&self.binary);
        command
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path);

        let output = collect_output(&mut command, cancel, PROBE_TIMEOUT, |e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::FfprobeNotFound
            } else {
                MediaError::Io(e)
            }
        })
        .await?;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: "FFprobe failed".to_string(),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            });
        }

        let metadata = parse_ffprobe_output(&output.stdout)?;
        debug!(
            path = %path.display(),
            duration = ?metadata.duration_secs,
            width = ?metadata.width,
            height = ?metadata.height,
            "Probed video"
        );
        Ok(metadata)
    }
}

/// Convert FFprobe JSON into [`VideoMetadata`].
pub fn parse_ffprobe_output(json: &[u8]) -> MediaResult<VideoMetadata> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;

    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let duration_secs = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    let bitrate = probe
        .format
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<u64>().ok());

    let frame_rate = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

    let (width, height) = video_stream.display_dimensions();

    Ok(VideoMetadata {
        duration_secs,
        width,
        height,
        frame_rate,
        bitrate,
        has_audio: Some(has_audio),
        codec: video_stream.codec_name.clone(),
        container: probe.format.format_name,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den > 0.0 && num > 0.0).then(|| num / den);
    }
    s.parse::<f64>().ok().filter(|f| *f > 0.0)
}
