//! Pipeline error types.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Refused by the upload policy; the reason is shown to the uploader.
    #[error("Upload rejected: {0}")]
    Rejected(String),

    #[error("Transcoding failed: {0}")]
    Transcode(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] skatehive_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] skatehive_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::Transcode(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Media(e) => e.is_cancelled(),
            Self::Storage(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Whether the uploader can fix this by changing the input.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Short reason suitable for the uploader.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected(reason) => reason.clone(),
            Self::Transcode(_) | Self::Media(_) => {
                "This video could not be processed. Try exporting it as MP4 and uploading again."
                    .to_string()
            }
            Self::UploadFailed(msg) => msg.clone(),
            Self::Storage(e) => e.user_message(),
            Self::Cancelled => "Processing cancelled".to_string(),
            Self::ConfigError(_) | Self::Io(_) => "Something went wrong on our side".to_string(),
        }
    }
}
