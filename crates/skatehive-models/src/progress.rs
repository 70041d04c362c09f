//! Structured progress events.
//!
//! Processing functions report through a [`ProgressReporter`], which wraps a
//! plain callback and enforces the ordering contract: stages only move
//! forward and the percentage within a stage never decreases.

use std::fmt;
use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pipeline stage, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Classifying,
    Transcoding,
    Thumbnail,
    Uploading,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Classifying => "classifying",
            Stage::Transcoding => "transcoding",
            Stage::Thumbnail => "thumbnail",
            Stage::Uploading => "uploading",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of one stage, 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub percent: f32,
}

impl ProgressEvent {
    pub fn new(stage: Stage, percent: f32) -> Self {
        Self { stage, percent }
    }
}

/// Callback receiving progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Monotonic progress reporter.
///
/// Clones share state, so one reporter can be handed to several stages of a
/// run and still emit a non-decreasing sequence.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: Arc<Mutex<Option<ProgressEvent>>>,
}

impl ProgressReporter {
    /// Create a reporter forwarding to `callback`.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Reporter that tracks progress but notifies nobody.
    pub fn noop() -> Self {
        Self {
            callback: None,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Report `percent` for `stage`.
    ///
    /// Events for an earlier stage, lower percentages and exact repeats are
    /// dropped. Values are clamped to `[0, 100]`; NaN is ignored.
    pub fn report(&self, stage: Stage, percent: f32) {
        if percent.is_nan() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);

        let event = {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(prev) = *last {
                if stage < prev.stage || (stage == prev.stage && percent <= prev.percent) {
                    return;
                }
            }
            let event = ProgressEvent::new(stage, percent);
            *last = Some(event);
            event
        };

        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    /// Report that a stage has started.
    pub fn begin(&self, stage: Stage) {
        self.report(stage, 0.0);
    }

    /// Report that a stage has finished.
    pub fn finish(&self, stage: Stage) {
        self.report(stage, 100.0);
    }

    /// Most recent event emitted.
    pub fn last(&self) -> Option<ProgressEvent> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("last", &self.last())
            .finish()
    }
}
