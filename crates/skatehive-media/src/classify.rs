//! File classification: decide how a source becomes the delivered artifact.

use serde::{Deserialize, Serialize};
use skatehive_models::{DeviceProfile, ProcessingDecision, SourceFile};
use tracing::debug;

use crate::source::{sniff_container, ContainerBrand};

const MB: u64 = 1024 * 1024;

/// Thresholds applied by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Above this size a QuickTime source is fully transcoded instead of
    /// repacked, so the delivered file also shrinks.
    pub repack_max_bytes: u64,
    /// Same ceiling for constrained devices.
    pub constrained_repack_max_bytes: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            repack_max_bytes: 500 * MB,
            constrained_repack_max_bytes: 100 * MB,
        }
    }
}

/// Classifier bound to a configuration.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Sniff the file header, then classify.
    pub async fn classify_file(
        &self,
        file: &SourceFile,
        profile: &DeviceProfile,
    ) -> ProcessingDecision {
        let brand = sniff_container(&file.path).await;
        self.classify(file, profile, brand.as_ref())
    }

    /// Decide the strategy for `file` given its sniffed container.
    ///
    /// Pure: the same inputs always produce the same decision.
    pub fn classify(
        &self,
        file: &SourceFile,
        profile: &DeviceProfile,
        brand: Option<&ContainerBrand>,
    ) -> ProcessingDecision {
        let decision = self.decide(file, profile, brand);
        debug!(
            file = %file.name,
            brand = ?brand.map(|b| b.to_string()),
            strategy = %decision.strategy(),
            "Classified source"
        );
        decision
    }

    fn decide(
        &self,
        file: &SourceFile,
        profile: &DeviceProfile,
        brand: Option<&ContainerBrand>,
    ) -> ProcessingDecision {
        if file.has_processed_marker() {
            return ProcessingDecision::skip();
        }

        // Unreadable header: transcoding is always safe
        let Some(brand) = brand else {
            return ProcessingDecision::full_transcode(profile);
        };

        if file.is_declared_mp4() && *brand == ContainerBrand::Mp4 {
            return ProcessingDecision::skip();
        }

        if file.is_declared_quicktime() || *brand == ContainerBrand::QuickTime {
            if !profile.wasm_transcode_supported {
                return ProcessingDecision::full_transcode(profile);
            }
            let ceiling = if profile.is_constrained() {
                self.config.constrained_repack_max_bytes
            } else {
                self.config.repack_max_bytes
            };
            if file.size > ceiling {
                return ProcessingDecision::full_transcode(profile);
            }
            return ProcessingDecision::container_repack();
        }

        ProcessingDecision::full_transcode(profile)
    }
}

/// Classify with the default thresholds.
pub fn classify(
    file: &SourceFile,
    profile: &DeviceProfile,
    brand: Option<&ContainerBrand>,
) -> ProcessingDecision {
    Classifier::default().classify(file, profile, brand)
}
