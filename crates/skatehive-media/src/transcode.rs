//! Primary engine: FFmpeg re-encode and container repack.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use skatehive_models::{ProgressReporter, Stage};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::{check_ffmpeg, spawn_error, FfmpegCommand, FfmpegRunner};
use crate::engine::{
    EngineLoader, TranscodeEngine, TranscodeMode, TranscodeRequest, TranscodedArtifact,
};
use crate::error::{MediaError, MediaResult};

/// Delivery container MIME type.
const OUTPUT_MIME: &str = "video/mp4";

/// Progress while encoding stops short of 100 until the output is verified.
const MAX_RUNNING_PERCENT: f64 = 99.0;

const FRAME_TIMEOUT: Duration = Duration::from_secs(30);

/// Scale into a `width`x`height` box and pad the rest with black.
pub fn letterbox_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black",
        w = width,
        h = height
    )
}

/// FFmpeg arguments for a transcode request.
pub fn build_transcode_command(request: &TranscodeRequest, output: &Path) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(&request.source.path, output);
    let cmd = match request.mode {
        TranscodeMode::Repack => cmd
            .output_args(["-map", "0:v:0", "-map", "0:a?"])
            .stream_copy(),
        TranscodeMode::Full => {
            let profile = &request.profile;
            cmd.video_filter(profile.video_filter())
                .video_codec(&profile.codec)
                .preset(&profile.preset)
                .crf(profile.crf)
                .output_args(["-pix_fmt", "yuv420p"])
                .output_arg("-r")
                .output_arg(profile.frame_rate.to_string())
                .audio_codec(&profile.audio_codec)
                .audio_bitrate(&profile.audio_bitrate)
                .output_args(["-ac", "2"])
        }
    };
    cmd.faststart()
}

/// Loads [`FfmpegEngine`] after checking the binary works.
#[derive(Debug, Clone, Default)]
pub struct FfmpegLoader {
    /// Explicit binary; `None` looks `ffmpeg` up in PATH
    binary: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl FfmpegLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl AsRef<Path>) -> Self {
        self.binary = Some(binary.as_ref().to_path_buf());
        self
    }

    /// Wall-clock limit applied to each transcode.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl EngineLoader for FfmpegLoader {
    async fn load(&self) -> MediaResult<Arc<dyn TranscodeEngine>> {
        let binary = match &self.binary {
            Some(b) => b.clone(),
            None => check_ffmpeg()?,
        };

        let output = Command::new(&binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(e, &binary))?;

        if !output.status.success() {
            return Err(MediaError::engine_unavailable(format!(
                "{} -version exited with {:?}",
                binary.display(),
                output.status.code()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().unwrap_or("unknown version");
        info!(binary = %binary.display(), version, "FFmpeg engine loaded");

        let mut engine = FfmpegEngine::new(binary);
        engine.timeout = self.timeout;
        Ok(Arc::new(engine))
    }
}

/// Re-encodes (or repacks) into the delivery MP4 format.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegEngine {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            timeout: None,
        }
    }

    fn runner(&self, cancel: &CancellationToken) -> FfmpegRunner {
        let runner = FfmpegRunner::new()
            .with_binary(&self.binary)
            .with_cancel(cancel.clone());
        match self.timeout {
            Some(t) => runner.with_timeout(t),
            None => runner,
        }
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> MediaResult<TranscodedArtifact> {
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let output = request.output_path("mp4");
        let cmd = build_transcode_command(request, &output);

        progress.begin(Stage::Transcoding);
        let total_ms = request.metadata.duration_ms();
        let reporter = progress.clone();

        let result = self
            .runner(cancel)
            .run_with_progress(&cmd, move |p| {
                let Some(total_ms) = total_ms else {
                    return;
                };
                let percent = p.percentage(total_ms).min(MAX_RUNNING_PERCENT);
                if let Some(eta) = p.eta_seconds(total_ms) {
                    debug!(percent, eta_secs = eta, "Transcode progress");
                }
                reporter.report(Stage::Transcoding, percent as f32);
            })
            .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }

        let size = tokio::fs::metadata(&output).await?.len();
        if size == 0 {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg produced an empty file",
                None,
                None,
            ));
        }

        progress.finish(Stage::Transcoding);
        Ok(TranscodedArtifact {
            path: output,
            mime_type: OUTPUT_MIME.to_string(),
            size,
            engine: self.name().to_string(),
        })
    }

    async fn extract_frame(
        &self,
        source: &Path,
        at_secs: f64,
        width: u32,
        height: u32,
        output: &Path,
        cancel: &CancellationToken,
    ) -> MediaResult<()> {
        // Output-side seek decodes up to the exact timestamp
        let cmd = FfmpegCommand::new(source, output)
            .output_seek(at_secs)
            .single_frame()
            .video_filter(letterbox_filter(width, height))
            .output_args(["-q:v", "3"])
            .without_progress();

        self.runner(cancel)
            .with_timeout(FRAME_TIMEOUT)
            .run(&cmd)
            .await?;

        match tokio::fs::metadata(output).await {
            Ok(m) if m.len() > 0 => Ok(()),
            _ => Err(MediaError::ffmpeg_failed(
                format!("No frame extracted at {:.3}s", at_secs),
                None,
                None,
            )),
        }
    }
}
