//! Upload metrics.

use metrics::{counter, histogram};
use skatehive_models::TransferMode;

/// Metric names as constants for consistency.
pub mod names {
    pub const UPLOADS_TOTAL: &str = "skatehive_uploads_total";
    pub const UPLOAD_DURATION_SECONDS: &str = "skatehive_upload_duration_seconds";
    pub const UPLOAD_BYTES_TOTAL: &str = "skatehive_upload_bytes_total";
    pub const CHUNK_FALLBACKS_TOTAL: &str = "skatehive_upload_chunk_fallbacks_total";
}

/// Record a finished upload attempt.
pub fn record_upload(transfer: TransferMode, success: bool, bytes: u64, duration_secs: f64) {
    let labels = [
        ("transfer", transfer.as_str().to_string()),
        ("outcome", if success { "success" } else { "failure" }.to_string()),
    ];

    counter!(names::UPLOADS_TOTAL, &labels).increment(1);
    histogram!(names::UPLOAD_DURATION_SECONDS, &labels).record(duration_secs);
    if success {
        counter!(names::UPLOAD_BYTES_TOTAL, &labels).increment(bytes);
    }
}

/// Record a chunked upload that fell back to a single request.
pub fn record_chunk_fallback() {
    counter!(names::CHUNK_FALLBACKS_TOTAL).increment(1);
}
