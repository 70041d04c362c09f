//! Upload client for the Skatehive content-addressed store.
//!
//! This crate provides:
//! - Single-request multipart uploads with streamed progress
//! - Chunked JSON uploads for large files, with a single-request fallback
//! - Gateway URL derivation from the returned content hash

pub mod config;
pub mod error;
pub mod metrics;
pub mod upload;

#[cfg(test)]
mod upload_tests;

pub use config::UploadConfig;
pub use error::{StorageError, StorageResult};
pub use upload::{UploadArtifact, UploadManager, UploadMetadata};
