//! Transcode job identity and status.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a transcode job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a single transcode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeStatus {
    /// Created, engine not yet running
    #[default]
    Pending,
    /// Engine is processing
    Running,
    /// Artifact produced
    Completed,
    /// Engine failed
    Failed,
    /// Caller requested early termination
    Cancelled,
}

impl TranscodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeStatus::Pending => "pending",
            TranscodeStatus::Running => "running",
            TranscodeStatus::Completed => "completed",
            TranscodeStatus::Failed => "failed",
            TranscodeStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TranscodeStatus::Completed | TranscodeStatus::Failed | TranscodeStatus::Cancelled
        )
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: TranscodeStatus) -> bool {
        match (self, next) {
            (TranscodeStatus::Pending, TranscodeStatus::Running) => true,
            (TranscodeStatus::Pending, TranscodeStatus::Cancelled) => true,
            (TranscodeStatus::Pending, TranscodeStatus::Failed) => true,
            (TranscodeStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TranscodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
