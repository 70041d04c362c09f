//! FFmpeg command builder and runner.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Diagnostics below this level are suppressed.
const LOG_LEVEL: &str = "error";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path (or `pipe:0`)
    input: PathBuf,
    /// Output file path (or `pipe:1`)
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Whether to emit `-progress pipe:2`
    progress: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            progress: true,
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Fast seek on the input (keyframe accurate).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Decode-accurate seek on the output side.
    pub fn output_seek(self, seconds: f64) -> Self {
        self.output_arg("-ss").output_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Copy all selected streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Move the index to the front of MP4 output.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Force the output container format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// Do not emit machine-readable progress on stderr.
    pub fn without_progress(mut self) -> Self {
        self.progress = false;
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());

        args.push("-v".to_string());
        args.push(LOG_LEVEL.to_string());

        // Progress output to stderr
        if self.progress {
            args.push("-progress".to_string());
            args.push("pipe:2".to_string());
        }

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// FFmpeg binary
    binary: PathBuf,
    /// Cancellation token
    cancel: Option<CancellationToken>,
    /// Wall-clock limit
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner using `ffmpeg` from PATH.
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            cancel: None,
            timeout: None,
        }
    }

    /// Use a specific FFmpeg binary.
    pub fn with_binary(mut self, binary: impl AsRef<Path>) -> Self {
        self.binary = binary.as_ref().to_path_buf();
        self
    }

    /// Set cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        if let Some(cancel) = &self.cancel {
            if cancel.is_cancelled() {
                return Err(MediaError::Cancelled);
            }
        }

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e, &self.binary))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;

        // Progress keys and diagnostics share stderr
        let progress_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut current_progress = FfmpegProgress::default();
            let mut tail = StderrTail::default();

            while let Ok(Some(line)) = reader.next_line().await {
                match parse_progress_line(&line, &mut current_progress) {
                    ProgressLine::Update(progress) => progress_callback(progress),
                    ProgressLine::Field => {}
                    ProgressLine::Other => tail.push(line),
                }
            }
            tail.into_string()
        });

        let result = wait_for_exit(&mut child, self.cancel.as_ref(), self.timeout).await;
        let stderr_tail = progress_handle.await.unwrap_or_default();

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                non_empty(stderr_tail),
                status.code(),
            )),
            Err(e) => Err(e),
        }
    }
}

/// Wait for a child process, killing it on cancellation or timeout.
pub(crate) async fn wait_for_exit(
    child: &mut Child,
    cancel: Option<&CancellationToken>,
    timeout: Option<Duration>,
) -> MediaResult<ExitStatus> {
    enum Outcome {
        Exited(std::io::Result<ExitStatus>),
        Cancelled,
        TimedOut(Duration),
    }

    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };
    let expired = async {
        match timeout {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending::<Duration>().await,
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = cancelled => Outcome::Cancelled,
        limit = expired => Outcome::TimedOut(limit),
    };

    match outcome {
        Outcome::Exited(status) => Ok(status?),
        Outcome::Cancelled => {
            info!("FFmpeg cancelled, killing process");
            let _ = child.kill().await;
            Err(MediaError::Cancelled)
        }
        Outcome::TimedOut(limit) => {
            warn!(
                "FFmpeg timed out after {} seconds, killing process",
                limit.as_secs()
            );
            let _ = child.kill().await;
            Err(MediaError::Timeout(limit.as_secs()))
        }
    }
}

/// Run `command` to completion and collect its output.
///
/// The process is killed when `cancel` fires or `limit` elapses.
pub(crate) async fn collect_output(
    command: &mut Command,
    cancel: &CancellationToken,
    limit: Duration,
    on_spawn_error: impl FnOnce(std::io::Error) -> MediaError,
) -> MediaResult<Output> {
    if cancel.is_cancelled() {
        return Err(MediaError::Cancelled);
    }

    let run = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    tokio::select! {
        result = tokio::time::timeout(limit, run) => match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(on_spawn_error(e)),
            Err(_) => {
                warn!("Process timed out after {} seconds, killed", limit.as_secs());
                Err(MediaError::Timeout(limit.as_secs()))
            }
        },
        _ = cancel.cancelled() => {
            info!("Process cancelled, killed");
            Err(MediaError::Cancelled)
        }
    }
}

/// Drain a process stream in the background, keeping its last lines.
pub(crate) fn collect_stderr<R>(stream: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream).lines();
        let mut tail = StderrTail::default();
        while let Ok(Some(line)) = reader.next_line().await {
            tail.push(line);
        }
        tail.into_string()
    })
}

/// Map a spawn failure to the right error.
pub(crate) fn spawn_error(err: std::io::Error, binary: &Path) -> MediaError {
    if err.kind() == std::io::ErrorKind::NotFound {
        warn!(binary = %binary.display(), "FFmpeg binary not found");
        MediaError::FfmpegNotFound
    } else {
        MediaError::Io(err)
    }
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Ring buffer over the last stderr lines.
#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
}

impl StderrTail {
    fn push(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

/// Classification of one stderr line.
#[derive(Debug)]
enum ProgressLine {
    /// A `progress=` terminator closing a block
    Update(FfmpegProgress),
    /// A key of a progress block
    Field,
    /// Anything else (diagnostics)
    Other,
}

const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "stream_0_0_q",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
];

/// Parse a progress line from FFmpeg's -progress output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> ProgressLine {
    let line = line.trim();

    let Some((key, value)) = line.split_once('=') else {
        return ProgressLine::Other;
    };

    match key {
        "out_time_ms" | "out_time_us" => {
            // Both keys are reported in microseconds by FFmpeg
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "speed" => {
            // Format: "1.5x" or "N/A"
            if let Some(speed) = value
                .trim()
                .strip_suffix('x')
                .and_then(|s| s.parse().ok())
            {
                current.speed = speed;
            }
        }
        "progress" => return ProgressLine::Update(current.clone()),
        k if PROGRESS_KEYS.contains(&k) => {}
        _ => return ProgressLine::Other,
    }

    ProgressLine::Field
}

/// List the encoders a local FFmpeg build provides.
pub async fn list_encoders(binary: impl AsRef<Path>) -> MediaResult<HashSet<String>> {
    let binary = binary.as_ref();
    let output = Command::new(binary)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(e, binary))?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "Failed to list encoders",
            non_empty(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    Ok(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `ffmpeg -encoders` output into encoder names.
pub fn parse_encoder_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
