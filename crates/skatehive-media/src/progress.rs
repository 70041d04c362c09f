//! FFmpeg progress parsing and progress event plumbing.

use serde::{Deserialize, Serialize};
use skatehive_models::{ProgressEvent, ProgressReporter};
use tokio::sync::mpsc;

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
}

impl FfmpegProgress {
    /// Calculate progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).clamp(0.0, 100.0)
    }

    /// Estimate time remaining in seconds.
    pub fn eta_seconds(&self, total_duration_ms: i64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }

        let remaining_ms = total_duration_ms - self.out_time_ms;
        if remaining_ms <= 0 {
            return Some(0.0);
        }

        // Time remaining = remaining duration / speed
        Some((remaining_ms as f64 / 1000.0) / self.speed)
    }
}

/// Reporter whose events are delivered on an unbounded channel.
///
/// Events stay subject to the reporter's ordering rules; the receiver sees
/// the same monotonic sequence a callback would.
pub fn channel() -> (ProgressReporter, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = ProgressReporter::new(move |event| {
        let _ = tx.send(event);
    });
    (reporter, rx)
}
