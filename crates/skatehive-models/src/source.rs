//! Source file handed to the pipeline by the caller.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Filename marker carried by artifacts this pipeline has already produced.
pub const PROCESSED_MARKER: &str = "_processed";

/// Standard delivery container MIME type.
pub const MP4_MIME: &str = "video/mp4";

/// Legacy Apple container MIME type.
pub const QUICKTIME_MIME: &str = "video/quicktime";

/// A raw video file selected by the user.
///
/// The pipeline only ever reads from `path`; the file is owned by the
/// caller for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceFile {
    /// Location of the bytes on disk
    pub path: PathBuf,
    /// Display filename (usually the last path component)
    pub name: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time reported by the filesystem
    pub last_modified: DateTime<Utc>,
}

impl SourceFile {
    /// Create a source file record.
    pub fn new(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            last_modified,
        }
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Filename without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    /// Whether the filename carries the processed-artifact marker.
    pub fn has_processed_marker(&self) -> bool {
        self.stem().to_ascii_lowercase().contains(PROCESSED_MARKER)
    }

    /// Declared as the standard delivery container (MP4).
    pub fn is_declared_mp4(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case(MP4_MIME)
            || (self.mime_type.is_empty() && self.extension().as_deref() == Some("mp4"))
    }

    /// Declared as the legacy Apple container (QuickTime / `.mov`).
    pub fn is_declared_quicktime(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case(QUICKTIME_MIME)
            || self.extension().as_deref() == Some("mov")
    }

    /// Size in mebibytes, for log lines and user-facing reasons.
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }
}
