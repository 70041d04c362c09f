//! Skatehive video ingestion pipeline.
//!
//! This crate provides:
//! - The composition root owning engines, probe and uploader
//! - The sequential ingest run (policy, classify, transcode, thumbnail, upload)
//! - Host environment snapshots for running outside a browser
//! - Structured run logging

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod pipeline;
pub mod resources;

#[cfg(test)]
mod pipeline_tests;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use host::{host_snapshot, host_user_agent};
pub use logging::JobLogger;
pub use pipeline::{IngestRequest, PipelineOutcome, VideoPipeline};
pub use resources::ResourceManager;
