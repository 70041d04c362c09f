//! Quality tiers for the frame-relay engine.

use crate::canvas::oriented;

/// Canvas size, bitrate and frame budget for one device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTier {
    /// Landscape canvas width
    pub width: u32,
    /// Landscape canvas height
    pub height: u32,
    pub bitrate_kbps: u32,
    /// Hard cap on relayed frames
    pub max_frames: u64,
    pub fps: u32,
}

impl RelayTier {
    /// Older or low-memory mobile devices.
    pub const fn constrained() -> Self {
        Self {
            width: 854,
            height: 480,
            bitrate_kbps: 1_000,
            max_frames: 900,
            fps: 30,
        }
    }

    pub const fn standard() -> Self {
        Self {
            width: 1280,
            height: 720,
            bitrate_kbps: 2_500,
            max_frames: 9_000,
            fps: 30,
        }
    }

    pub fn for_device(constrained: bool) -> Self {
        if constrained {
            Self::constrained()
        } else {
            Self::standard()
        }
    }

    /// Canvas dimensions for a source orientation.
    pub fn canvas_for(&self, portrait: bool) -> (u32, u32) {
        oriented(self.width, self.height, portrait)
    }

    /// Frames expected for a source of `duration_secs`, within the cap.
    pub fn frame_budget(&self, duration_secs: Option<f64>) -> u64 {
        match duration_secs {
            Some(d) if d.is_finite() && d > 0.0 => {
                ((d * self.fps as f64).ceil() as u64).clamp(1, self.max_frames)
            }
            _ => self.max_frames,
        }
    }
}
