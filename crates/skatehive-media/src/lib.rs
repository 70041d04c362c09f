//! Media processing for Skatehive uploads.
//!
//! This crate provides:
//! - Device capability detection and file classification
//! - Type-safe FFmpeg command building and progress parsing
//! - Lazily loaded transcoding engines behind a common trait
//! - A frame-relay fallback engine for machines the primary engine cannot serve
//! - Best-effort thumbnail extraction
//! - Cancellation support via tokio

pub mod canvas;
pub mod classify;
pub mod command;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod probe;
pub mod progress;
pub mod source;
pub mod thumbnail;
pub mod transcode;

pub use classify::{classify, Classifier, ClassifierConfig};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use decode::{FfmpegFrameSource, FrameSource, RgbaFrame};
pub use device::detect;
pub use engine::{
    EngineHandle, EngineLoader, EngineState, TranscodeEngine, TranscodeJob, TranscodeMode,
    TranscodeRequest, TranscodedArtifact,
};
pub use error::{MediaError, MediaResult};
pub use fallback::{FrameRelayEngine, RecorderFormat, RelayTier};
pub use probe::{FfprobeProbe, MediaProbe};
pub use progress::FfmpegProgress;
pub use source::{open_source, sniff_container, ContainerBrand};
pub use thumbnail::{seek_point, ThumbnailConfig, ThumbnailExtractor};
pub use transcode::{FfmpegEngine, FfmpegLoader};
