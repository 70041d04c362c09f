//! Structured run logging utilities.
//!
//! Provides consistent, structured logging for ingestion runs with
//! tracing spans and contextual information.

use skatehive_models::JobId;
use tracing::{error, info, warn, Span};

/// Logger for one ingestion run.
///
/// Every line carries the run ID, the operation and the source file name.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    file: String,
}

impl JobLogger {
    /// Create a logger for a specific run, operation (e.g. "ingest",
    /// "thumbnail") and source file.
    pub fn new(job_id: &JobId, operation: &str, file: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            file: file.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            file = %self.file,
            "Run started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            file = %self.file,
            "Run progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            file = %self.file,
            "Run warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            file = %self.file,
            "Run error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            file = %self.file,
            "Run completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span that nested engine and upload logs attach to.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "ingest",
            job_id = %self.job_id,
            operation = %self.operation,
            file = %self.file
        )
    }
}
