//! Upload policy gate.
//!
//! Size and duration ceilings as a function of the caller's reputation
//! score (HP). Absolute ceilings apply to everyone; the middle band is
//! unlocked by reaching the HP cutoff.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;

/// Size everyone may upload.
pub const BASIC_SIZE_LIMIT_BYTES: u64 = 500 * MB;
/// Above this size compression is mandatory, whatever the HP.
pub const FORCE_COMPRESSION_BYTES: u64 = 1024 * MB;
/// Hard size cap (uploads at or above are never allowed).
pub const ABSOLUTE_SIZE_LIMIT_BYTES: u64 = 2048 * MB;
/// Duration everyone may upload.
pub const BASIC_DURATION_LIMIT_SECS: f64 = 15.0;
/// Hard duration cap.
pub const ABSOLUTE_DURATION_LIMIT_SECS: f64 = 300.0;
/// HP needed to unlock the extended band.
pub const HP_CUTOFF: f64 = 100.0;

/// Authoritative limit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyTable {
    pub basic_size_bytes: u64,
    pub force_compression_bytes: u64,
    pub absolute_size_bytes: u64,
    pub basic_duration_secs: f64,
    pub absolute_duration_secs: f64,
    pub hp_cutoff: f64,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            basic_size_bytes: BASIC_SIZE_LIMIT_BYTES,
            force_compression_bytes: FORCE_COMPRESSION_BYTES,
            absolute_size_bytes: ABSOLUTE_SIZE_LIMIT_BYTES,
            basic_duration_secs: BASIC_DURATION_LIMIT_SECS,
            absolute_duration_secs: ABSOLUTE_DURATION_LIMIT_SECS,
            hp_cutoff: HP_CUTOFF,
        }
    }
}

/// Outcome of a size check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SizeCheck {
    pub can_upload: bool,
    /// Compression recommended before upload
    pub needs_compression: bool,
    /// Compression mandatory before upload
    pub force_compression: bool,
    pub reason: Option<String>,
}

/// Outcome of a duration check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DurationCheck {
    pub can_upload: bool,
    pub needs_trimming: bool,
    pub reason: Option<String>,
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / MB as f64
}

impl PolicyTable {
    /// Check a file size against the table.
    pub fn check_size(&self, size_bytes: u64, hp: f64) -> SizeCheck {
        if size_bytes >= self.absolute_size_bytes {
            return SizeCheck {
                can_upload: false,
                needs_compression: false,
                force_compression: false,
                reason: Some(format!(
                    "File is {:.1}MB; the maximum upload size is {:.0}MB",
                    mb(size_bytes),
                    mb(self.absolute_size_bytes)
                )),
            };
        }

        if size_bytes <= self.basic_size_bytes {
            return SizeCheck {
                can_upload: true,
                needs_compression: false,
                force_compression: false,
                reason: None,
            };
        }

        if !meets_cutoff(hp, self.hp_cutoff) {
            return SizeCheck {
                can_upload: false,
                needs_compression: false,
                force_compression: false,
                reason: Some(format!(
                    "File is {:.1}MB; files over {:.0}MB need {:.0} HP, you have {} ({} short)",
                    mb(size_bytes),
                    mb(self.basic_size_bytes),
                    self.hp_cutoff,
                    format_hp(hp),
                    format_hp(self.hp_cutoff - sanitize_hp(hp))
                )),
            };
        }

        let force = size_bytes > self.force_compression_bytes;
        SizeCheck {
            can_upload: true,
            needs_compression: true,
            force_compression: force,
            reason: force.then(|| {
                format!(
                    "File is {:.1}MB; files over {:.0}MB are always compressed",
                    mb(size_bytes),
                    mb(self.force_compression_bytes)
                )
            }),
        }
    }

    /// Check a duration against the table.
    pub fn check_duration(&self, duration_secs: f64, hp: f64) -> DurationCheck {
        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return DurationCheck {
                can_upload: false,
                needs_trimming: false,
                reason: Some("Video duration could not be determined".to_string()),
            };
        }

        if duration_secs > self.absolute_duration_secs {
            return DurationCheck {
                can_upload: false,
                needs_trimming: true,
                reason: Some(format!(
                    "Video is {:.1}s; the maximum duration is {:.0}s",
                    duration_secs, self.absolute_duration_secs
                )),
            };
        }

        if duration_secs <= self.basic_duration_secs {
            return DurationCheck {
                can_upload: true,
                needs_trimming: false,
                reason: None,
            };
        }

        if meets_cutoff(hp, self.hp_cutoff) {
            DurationCheck {
                can_upload: true,
                needs_trimming: false,
                reason: None,
            }
        } else {
            DurationCheck {
                can_upload: false,
                needs_trimming: true,
                reason: Some(format!(
                    "Video is {:.1}s; videos over {:.0}s need {:.0} HP, you have {} ({} short). Trim it to {:.0}s or less",
                    duration_secs,
                    self.basic_duration_secs,
                    self.hp_cutoff,
                    format_hp(hp),
                    format_hp(self.hp_cutoff - sanitize_hp(hp)),
                    self.basic_duration_secs
                )),
            }
        }
    }
}

fn sanitize_hp(hp: f64) -> f64 {
    if hp.is_finite() {
        hp.max(0.0)
    } else {
        0.0
    }
}

fn meets_cutoff(hp: f64, cutoff: f64) -> bool {
    hp.is_finite() && hp >= cutoff
}

fn format_hp(hp: f64) -> String {
    format!("{:.1}", sanitize_hp(hp))
}

/// Size check against the default table.
pub fn check_size(size_bytes: u64, hp: f64) -> SizeCheck {
    PolicyTable::default().check_size(size_bytes, hp)
}

/// Duration check against the default table.
pub fn check_duration(duration_secs: f64, hp: f64) -> DurationCheck {
    PolicyTable::default().check_duration(duration_secs, hp)
}
