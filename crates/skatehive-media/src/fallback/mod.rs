//! Frame-relay fallback engine.
//!
//! Used when the primary engine cannot run (or failed). A decoder process
//! plays the source as raw frames; each frame is letterboxed onto a fixed
//! canvas and handed to a recorder process that encodes whatever format
//! the local build supports. Audio is not carried.

mod recorder;
mod tier;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use skatehive_models::{ProgressReporter, Stage};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use recorder::{build_recorder_command, negotiate_format, RecorderFormat, RECORDER_FORMATS};
pub use tier::RelayTier;

use crate::canvas::{fit_within, Canvas};
use crate::command::{collect_stderr, list_encoders, non_empty, spawn_error};
use crate::decode::{FfmpegFrameSource, FrameSource, FrameStream};
use crate::engine::{TranscodeEngine, TranscodeRequest, TranscodedArtifact};
use crate::error::{MediaError, MediaResult};

/// Time allowed for the first frame to arrive.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Time allowed for the recorder to flush after the last frame.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound for the frame decoded to discover unknown source dimensions.
const SIZING_FRAME_MAX: u32 = 8192;

/// Re-encodes by relaying decoded frames through a canvas.
#[derive(Debug)]
pub struct FrameRelayEngine {
    binary: PathBuf,
    frames: FfmpegFrameSource,
    load_timeout: Duration,
    encoders: OnceCell<HashSet<String>>,
}

impl FrameRelayEngine {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        let binary = binary.as_ref().to_path_buf();
        Self {
            frames: FfmpegFrameSource::new(&binary),
            binary,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            encoders: OnceCell::new(),
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Restrict negotiation to a known encoder list instead of asking the
    /// binary.
    pub fn with_encoders(self, encoders: HashSet<String>) -> Self {
        Self {
            encoders: OnceCell::new_with(Some(encoders)),
            ..self
        }
    }

    async fn available_encoders(&self) -> MediaResult<&HashSet<String>> {
        self.encoders
            .get_or_try_init(|| list_encoders(&self.binary))
            .await
    }

    /// Pick the recording format for this machine.
    pub async fn negotiate(&self) -> MediaResult<&'static RecorderFormat> {
        let encoders = self.available_encoders().await?;
        negotiate_format(encoders).ok_or(MediaError::NoCompatibleEncoder)
    }

    /// Display dimensions of the source, decoding its first frame when the
    /// metadata does not carry them.
    async fn source_dimensions(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> MediaResult<(u32, u32)> {
        if let Some(dimensions) = request.metadata.dimensions() {
            return Ok(dimensions);
        }

        debug!(source = %request.source.name, "Dimensions unknown, decoding first frame");
        let frame = self
            .frames
            .grab_frame(
                &request.source.path,
                0.0,
                SIZING_FRAME_MAX,
                SIZING_FRAME_MAX,
                cancel,
            )
            .await?;
        Ok((frame.width, frame.height))
    }

    fn spawn_recorder(
        &self,
        format: &RecorderFormat,
        canvas: (u32, u32),
        tier: &RelayTier,
        output: &Path,
    ) -> MediaResult<Recorder> {
        let cmd = build_recorder_command(
            format,
            canvas.0,
            canvas.1,
            tier.fps,
            tier.bitrate_kbps,
            output,
        );
        let args = cmd.build_args();
        debug!("Starting recorder: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e, &self.binary))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("recorder stdin not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("recorder stderr not captured"))?;

        Ok(Recorder {
            child,
            stdin: Some(stdin),
            stderr: Some(collect_stderr(stderr)),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn relay(
        &self,
        stream: &mut FrameStream,
        recorder: &mut Recorder,
        canvas: &mut Canvas,
        tier: &RelayTier,
        budget: u64,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> MediaResult<u64> {
        let first = tokio::select! {
            next = tokio::time::timeout(self.load_timeout, stream.next_frame()) => match next {
                Ok(frame) => frame?,
                Err(_) => {
                    warn!(timeout_secs = self.load_timeout.as_secs(), "Source did not load in time");
                    return Err(MediaError::Timeout(self.load_timeout.as_secs()));
                }
            },
            _ = cancel.cancelled() => return Err(MediaError::Cancelled),
        };

        let Some(mut frame) = first else {
            return Err(MediaError::invalid_video("source produced no frames"));
        };

        let mut relayed = 0u64;
        loop {
            canvas.draw(&frame)?;
            recorder.write_frame(canvas.as_raw()).await?;
            relayed += 1;

            let percent = (relayed as f64 / budget as f64 * 100.0).min(99.0);
            progress.report(Stage::Transcoding, percent as f32);

            if relayed >= tier.max_frames {
                info!(frames = relayed, "Frame cap reached, stopping relay");
                break;
            }

            // One suspension per frame keeps the runtime responsive
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                return Err(MediaError::Cancelled);
            }

            let next = tokio::select! {
                next = stream.next_frame() => next?,
                _ = cancel.cancelled() => return Err(MediaError::Cancelled),
            };
            match next {
                Some(f) => frame = f,
                None => break,
            }
        }

        Ok(relayed)
    }
}

#[async_trait]
impl TranscodeEngine for FrameRelayEngine {
    fn name(&self) -> &'static str {
        "frame-relay"
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> MediaResult<TranscodedArtifact> {
        let (src_w, src_h) = self.source_dimensions(request, cancel).await?;

        let tier = RelayTier::for_device(request.constrained);
        let canvas_size = tier.canvas_for(src_h > src_w);
        let (fit_w, fit_h) = fit_within(src_w, src_h, canvas_size.0, canvas_size.1);
        let format = self.negotiate().await?;
        let budget = tier.frame_budget(request.metadata.duration_secs);

        tokio::fs::create_dir_all(&request.output_dir).await?;
        let output = request.output_path(format.extension);

        info!(
            source = %request.source.name,
            canvas = %format!("{}x{}", canvas_size.0, canvas_size.1),
            format = format.mime_type,
            bitrate_kbps = tier.bitrate_kbps,
            max_frames = tier.max_frames,
            "Starting frame relay"
        );
        progress.begin(Stage::Transcoding);

        let mut stream = self.frames.open_stream(&request.source.path, fit_w, fit_h, tier.fps)?;
        let mut recorder = match self.spawn_recorder(format, canvas_size, &tier, &output) {
            Ok(r) => r,
            Err(e) => {
                stream.close().await;
                return Err(e);
            }
        };
        let mut canvas = Canvas::new(canvas_size.0, canvas_size.1);

        let relayed = self
            .relay(
                &mut stream,
                &mut recorder,
                &mut canvas,
                &tier,
                budget,
                progress,
                cancel,
            )
            .await;
        let decoder_log = stream.close().await;

        let result = match relayed {
            Ok(frames) => recorder.finish(cancel).await.map(|_| frames),
            Err(e) => {
                recorder.abort().await;
                if !e.is_cancelled() {
                    if let Some(log) = non_empty(decoder_log) {
                        debug!(decoder_log = %log, "Frame decoder output");
                    }
                }
                Err(e)
            }
        };

        let frames = match result {
            Ok(frames) => frames,
            Err(e) => {
                let _ = tokio::fs::remove_file(&output).await;
                return Err(e);
            }
        };

        let size = match tokio::fs::metadata(&output).await {
            Ok(m) if m.len() > 0 => m.len(),
            _ => {
                let _ = tokio::fs::remove_file(&output).await;
                return Err(MediaError::ffmpeg_failed("recorder produced no output", None, None));
            }
        };

        progress.finish(Stage::Transcoding);
        info!(frames, output_size = size, "Frame relay finished");

        Ok(TranscodedArtifact {
            path: output,
            mime_type: format.container_mime().to_string(),
            size,
            engine: self.name().to_string(),
        })
    }
}

/// Running recorder process.
struct Recorder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<tokio::task::JoinHandle<String>>,
}

impl Recorder {
    async fn write_frame(&mut self, pixels: &[u8]) -> MediaResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("recorder input already closed"))?;
        if let Err(e) = stdin.write_all(pixels).await {
            let log = self.take_log().await;
            return Err(MediaError::ffmpeg_failed(
                format!("recorder stopped accepting frames: {}", e),
                non_empty(log),
                None,
            ));
        }
        Ok(())
    }

    async fn take_log(&mut self) -> String {
        let _ = self.child.start_kill();
        match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Close the input and wait for the file to be finalized.
    async fn finish(mut self, cancel: &CancellationToken) -> MediaResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().await?;
        }

        let status = crate::command::wait_for_exit(
            &mut self.child,
            Some(cancel),
            Some(FINALIZE_TIMEOUT),
        )
        .await?;
        let log = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "recorder exited with non-zero status",
                non_empty(log),
                status.code(),
            ))
        }
    }

    async fn abort(mut self) {
        drop(self.stdin.take());
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}
