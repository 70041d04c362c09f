//! Raw frame decoding through FFmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{collect_output, collect_stderr, non_empty, spawn_error, FfmpegCommand};
use crate::error::{MediaError, MediaResult};

const GRAB_TIMEOUT: Duration = Duration::from_secs(20);

/// One decoded RGBA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8 pixels
    pub data: Vec<u8>,
}

impl RgbaFrame {
    /// Frame from raw pixels; `data` must hold exactly `width * height * 4`
    /// bytes.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> MediaResult<Self> {
        if data.len() != frame_len(width, height) {
            return Err(MediaError::invalid_video(format!(
                "frame buffer of {} bytes does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Source of single still frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Decode the frame shown at `at_secs`, scaled down to fit within
    /// `max_width`x`max_height`. The decoder is killed when `cancel` fires.
    async fn grab_frame(
        &self,
        path: &Path,
        at_secs: f64,
        max_width: u32,
        max_height: u32,
        cancel: &CancellationToken,
    ) -> MediaResult<RgbaFrame>;
}

/// FFmpeg-backed frame decoder.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    binary: PathBuf,
}

impl Default for FfmpegFrameSource {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegFrameSource {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }

    /// Start decoding `path` as a stream of `width`x`height` RGBA frames at
    /// a constant `fps`.
    ///
    /// The source is scaled to fit exactly; callers pick dimensions with
    /// the source aspect ratio.
    pub fn open_stream(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> MediaResult<FrameStream> {
        let cmd = FfmpegCommand::new(path, "pipe:1")
            .output_arg("-an")
            .video_filter(format!("fps={},scale={}:{}", fps, width, height))
            .output_args(["-pix_fmt", "rgba"])
            .format("rawvideo")
            .without_progress();
        let args = cmd.build_args();
        debug!("Starting frame decoder: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e, &self.binary))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("decoder stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("decoder stderr not captured"))?;

        Ok(FrameStream {
            child,
            stdout,
            stderr: collect_stderr(stderr),
            width,
            height,
        })
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn grab_frame(
        &self,
        path: &Path,
        at_secs: f64,
        max_width: u32,
        max_height: u32,
        cancel: &CancellationToken,
    ) -> MediaResult<RgbaFrame> {
        // PNG keeps the frame self-describing, so dimensions need not be known
        let cmd = FfmpegCommand::new(path, "pipe:1")
            .seek(at_secs)
            .single_frame()
            .video_filter(format!(
                "scale='min(iw,{w})':'min(ih,{h})':force_original_aspect_ratio=decrease",
                w = max_width,
                h = max_height
            ))
            .output_args(["-c:v", "png"])
            .format("image2pipe")
            .without_progress();

        let mut command = Command::new(&self.binary);
        command.args(cmd.build_args());
        let output = collect_output(&mut command, cancel, GRAB_TIMEOUT, |e| {
            spawn_error(e, &self.binary)
        })
        .await?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(MediaError::ffmpeg_failed(
                format!("No frame decoded at {:.3}s", at_secs),
                non_empty(String::from_utf8_lossy(&output.stderr).to_string()),
                output.status.code(),
            ));
        }

        let image = image::load_from_memory(&output.stdout)?.to_rgba8();
        let (width, height) = image.dimensions();
        RgbaFrame::new(width, height, image.into_raw())
    }
}

/// Running decoder producing fixed-size RGBA frames.
#[derive(Debug)]
pub struct FrameStream {
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
    width: u32,
    height: u32,
}

impl FrameStream {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Next frame, or `None` once the source is exhausted.
    pub async fn next_frame(&mut self) -> MediaResult<Option<RgbaFrame>> {
        let mut data = vec![0u8; frame_len(self.width, self.height)];
        match self.stdout.read_exact(&mut data).await {
            Ok(_) => Ok(Some(RgbaFrame {
                width: self.width,
                height: self.height,
                data,
            })),
            // A trailing partial frame is dropped
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop the decoder and return its diagnostic tail.
    pub async fn close(mut self) -> String {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.stderr.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_is_checked() {
        assert!(RgbaFrame::new(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            RgbaFrame::new(2, 2, vec![0; 15]),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[tokio::test]
    async fn test_grab_frame_without_binary() {
        let source = FfmpegFrameSource::new("/nonexistent/ffmpeg");
        let result = source
            .grab_frame(Path::new("/tmp/none.mp4"), 1.0, 640, 360, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(MediaError::FfmpegNotFound)));
    }

    #[cfg(unix)]
    fn stalled_binary(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("stalled-ffmpeg");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_grab_frame_cancelled_mid_decode() {
        let dir = tempfile::tempdir().unwrap();
        let source = FfmpegFrameSource::new(stalled_binary(dir.path()));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            source.grab_frame(Path::new("/tmp/none.mp4"), 1.0, 640, 360, &cancel),
        )
        .await
        .expect("grab_frame should stop once cancelled");
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_grab_frame_from_generated_video() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.mp4");
        let status = tokio::process::Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-f", "lavfi", "-i", "testsrc=size=320x240:rate=30:duration=2"])
            .arg(&path)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let frame = FfmpegFrameSource::default()
            .grab_frame(&path, 0.5, 160, 160, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((frame.width, frame.height), (160, 120));
    }
}
