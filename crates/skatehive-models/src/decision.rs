//! Processing decision produced by the file classifier.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::DeviceProfile;

/// How a source file is turned into the delivered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Upload the original bytes unchanged
    Skip,
    /// Rewrite the container without re-encoding
    ContainerRepack,
    /// Full re-encode on the primary engine
    WasmTranscode,
    /// Full re-encode on the frame-relay fallback engine
    CanvasFallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Skip => "skip",
            Strategy::ContainerRepack => "container-repack",
            Strategy::WasmTranscode => "wasm-transcode",
            Strategy::CanvasFallback => "canvas-fallback",
        }
    }

    /// Full transcode strategy available to a device.
    pub fn full_transcode_for(profile: &DeviceProfile) -> Self {
        if profile.wasm_transcode_supported {
            Strategy::WasmTranscode
        } else {
            Strategy::CanvasFallback
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingDecision {
    pub needs_processing: bool,
    pub container_only: bool,
    pub target_strategy: Strategy,
}

impl ProcessingDecision {
    /// Decision for a strategy; the flags always agree with it.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            needs_processing: strategy != Strategy::Skip,
            container_only: strategy == Strategy::ContainerRepack,
            target_strategy: strategy,
        }
    }

    pub fn skip() -> Self {
        Self::new(Strategy::Skip)
    }

    pub fn container_repack() -> Self {
        Self::new(Strategy::ContainerRepack)
    }

    pub fn full_transcode(profile: &DeviceProfile) -> Self {
        Self::new(Strategy::full_transcode_for(profile))
    }

    /// Upgrade a pass-through or repack decision to a full re-encode.
    pub fn require_compression(self, profile: &DeviceProfile) -> Self {
        match self.target_strategy {
            Strategy::Skip | Strategy::ContainerRepack => Self::full_transcode(profile),
            _ => self,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.target_strategy
    }
}
