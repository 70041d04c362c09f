//! Shared data models for the Skatehive video pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Source files, device profiles and processing decisions
//! - Video metadata and transcode job status
//! - Upload results and thumbnail artifacts
//! - Structured progress events
//! - The reputation-based upload policy gate

pub mod decision;
pub mod device;
pub mod encoding;
pub mod job;
pub mod policy;
pub mod progress;
pub mod source;
pub mod upload;
pub mod video;

// Re-export common types
pub use decision::{ProcessingDecision, Strategy};
pub use device::{
    BrowserFamily, DeviceClass, DeviceProfile, EnvironmentSnapshot, MemoryTier, OsVersion,
    PlatformFamily,
};
pub use encoding::EncodingProfile;
pub use job::{JobId, TranscodeStatus};
pub use policy::{check_duration, check_size, DurationCheck, PolicyTable, SizeCheck};
pub use progress::{ProgressCallback, ProgressEvent, ProgressReporter, Stage};
pub use source::SourceFile;
pub use upload::{ThumbnailArtifact, TransferMode, UploadResult};
pub use video::VideoMetadata;
