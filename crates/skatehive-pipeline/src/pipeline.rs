//! Ingestion pipeline: policy, classification, transcoding, thumbnail and
//! upload for one source file.
//!
//! Stages run strictly one after another. Scratch files live in a per-run
//! temporary directory removed when the run ends.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use skatehive_media::{
    detect, open_source, Classifier, MediaError, ThumbnailExtractor, TranscodeJob,
    TranscodeRequest, TranscodedArtifact,
};
use skatehive_models::{
    DeviceProfile, EnvironmentSnapshot, JobId, ProcessingDecision, ProgressReporter,
    SourceFile, Stage, Strategy, UploadResult, VideoMetadata,
};
use skatehive_storage::{UploadArtifact, UploadMetadata};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::resources::ResourceManager;

const RUNS_TOTAL: &str = "skatehive_pipeline_runs_total";
const FALLBACKS_TOTAL: &str = "skatehive_transcode_fallbacks_total";

/// Who is uploading, and from where.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Reputation score of the uploader
    pub hp: f64,
    /// Runtime the file was selected on
    pub environment: EnvironmentSnapshot,
    /// Account name stored with the upload
    pub creator: Option<String>,
}

impl IngestRequest {
    pub fn new(hp: f64, environment: EnvironmentSnapshot) -> Self {
        Self {
            hp,
            environment,
            creator: None,
        }
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub decision: ProcessingDecision,
    pub device: DeviceProfile,
    pub metadata: VideoMetadata,
    /// Engine that produced the uploaded file; `None` when the source was
    /// uploaded as-is
    pub engine_used: Option<String>,
    pub upload: UploadResult,
    pub thumbnail_url: Option<String>,
}

/// Runs source files through the ingestion stages.
pub struct VideoPipeline {
    resources: Arc<ResourceManager>,
    config: PipelineConfig,
    classifier: Classifier,
}

impl VideoPipeline {
    pub fn new(resources: Arc<ResourceManager>, config: PipelineConfig) -> Self {
        let classifier = Classifier::new(config.classifier.clone());
        Self {
            resources,
            config,
            classifier,
        }
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Process the file at `path`.
    pub async fn process_path(
        &self,
        path: impl AsRef<Path>,
        request: &IngestRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineOutcome> {
        let file = open_source(path).await?;
        self.process(&file, request, progress, cancel).await
    }

    /// Process one source file end to end.
    pub async fn process(
        &self,
        file: &SourceFile,
        request: &IngestRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineOutcome> {
        let logger = JobLogger::new(&JobId::new(), "ingest", &file.name);
        let span = logger.create_span();
        let started = Instant::now();

        let result = self
            .run(file, request, progress, cancel, &logger)
            .instrument(span)
            .await;

        let outcome_label = match &result {
            Ok(_) => "success",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(PipelineError::Rejected(_)) => "rejected",
            Err(_) => "failure",
        };
        counter!(RUNS_TOTAL, "outcome" => outcome_label).increment(1);

        match &result {
            Ok(outcome) => logger.log_completion(&format!(
                "strategy={} engine={} url={} in {:.1}s",
                outcome.decision.strategy(),
                outcome.engine_used.as_deref().unwrap_or("none"),
                outcome.upload.url.as_deref().unwrap_or("-"),
                started.elapsed().as_secs_f64()
            )),
            Err(e) if e.is_user_error() || e.is_cancelled() => logger.log_warning(&e.to_string()),
            Err(e) => logger.log_error(&e.to_string()),
        }

        result
    }

    async fn run(
        &self,
        file: &SourceFile,
        request: &IngestRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
        logger: &JobLogger,
    ) -> PipelineResult<PipelineOutcome> {
        logger.log_start(&format!("{:.1}MB, hp={}", file.size_mb(), request.hp));
        ensure_active(cancel)?;

        // Policy on size
        progress.begin(Stage::Validating);
        let size_check = self.config.policy.check_size(file.size, request.hp);
        if !size_check.can_upload {
            return Err(PipelineError::rejected(
                size_check.reason.unwrap_or_else(|| "File is too large".to_string()),
            ));
        }

        let metadata = match self.resources.probe().probe(&file.path, cancel).await {
            Ok(m) => m,
            Err(e) => {
                logger.log_warning(&format!("metadata unavailable: {}", e));
                VideoMetadata::unknown()
            }
        };
        ensure_active(cancel)?;

        // Policy on duration, when known
        if let Some(duration) = metadata.duration_secs {
            let check = self.config.policy.check_duration(duration, request.hp);
            if !check.can_upload {
                return Err(PipelineError::rejected(
                    check.reason.unwrap_or_else(|| "Video is too long".to_string()),
                ));
            }
        }
        progress.finish(Stage::Validating);

        // Classification
        progress.begin(Stage::Classifying);
        let device = detect(&request.environment);
        let mut decision = self.classifier.classify_file(file, &device).await;
        if size_check.force_compression {
            decision = decision.require_compression(&device);
        }
        logger.log_progress(&format!("strategy={}", decision.strategy()));
        progress.finish(Stage::Classifying);

        let scratch = self.scratch_dir()?;

        // Transcoding
        let transcoded = if decision.needs_processing {
            let request = TranscodeRequest::for_decision(
                file.clone(),
                &decision,
                &device,
                metadata.clone(),
                scratch.path(),
            );
            Some(self.transcode(&decision, &request, progress, cancel, logger).await?)
        } else {
            progress.begin(Stage::Transcoding);
            progress.finish(Stage::Transcoding);
            None
        };
        ensure_active(cancel)?;

        // Thumbnail, best effort
        progress.begin(Stage::Thumbnail);
        let upload_meta = UploadMetadata::new(request.creator.clone(), device.device_class());
        let thumbnail_url = if self.config.thumbnails_enabled {
            self.thumbnail_url(file, &metadata, &upload_meta, cancel).await
        } else {
            None
        };
        progress.finish(Stage::Thumbnail);
        ensure_active(cancel)?;

        // Upload
        let artifact = match &transcoded {
            Some(t) => UploadArtifact::new(&t.path, t.file_name(), &t.mime_type, t.size),
            None => UploadArtifact::new(&file.path, &file.name, &file.mime_type, file.size),
        };
        let upload = self
            .resources
            .uploader()
            .upload(&artifact, &upload_meta, progress, cancel)
            .await;
        drop(scratch);

        if !upload.success {
            ensure_active(cancel)?;
            return Err(PipelineError::UploadFailed(
                upload
                    .error
                    .clone()
                    .unwrap_or_else(|| "Upload failed".to_string()),
            ));
        }
        progress.finish(Stage::Complete);

        Ok(PipelineOutcome {
            decision,
            device,
            metadata,
            engine_used: transcoded.map(|t| t.engine),
            upload,
            thumbnail_url,
        })
    }

    /// Primary engine first; the fallback gets one attempt if it fails.
    /// Decisions that target the fallback go straight to it.
    async fn transcode(
        &self,
        decision: &ProcessingDecision,
        request: &TranscodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
        logger: &JobLogger,
    ) -> PipelineResult<TranscodedArtifact> {
        progress.begin(Stage::Transcoding);

        if decision.strategy() == Strategy::CanvasFallback {
            return self
                .run_fallback(request, progress, cancel)
                .await
                .map_err(|e| transcode_error(e, "fallback engine failed"));
        }

        let primary: Result<TranscodedArtifact, MediaError> = async {
            let engine = self.resources.engine().get(cancel).await?;
            TranscodeJob::new(progress.clone(), cancel.child_token())
                .run(engine.as_ref(), request)
                .await
        }
        .await;

        match primary {
            Ok(artifact) => Ok(artifact),
            Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled),
            Err(primary_err) => {
                logger.log_warning(&format!(
                    "primary engine failed ({}), trying fallback",
                    primary_err
                ));
                counter!(FALLBACKS_TOTAL).increment(1);
                self.run_fallback(request, progress, cancel)
                    .await
                    .map_err(|e| {
                        transcode_error(
                            e,
                            &format!("primary engine failed ({}) and fallback", primary_err),
                        )
                    })
            }
        }
    }

    async fn run_fallback(
        &self,
        request: &TranscodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<TranscodedArtifact, MediaError> {
        let engine = self.resources.fallback();
        TranscodeJob::new(progress.clone(), cancel.child_token())
            .run(engine.as_ref(), &request.as_full())
            .await
    }

    /// Extract a thumbnail for `file` and upload it.
    ///
    /// Returns the thumbnail URL, or `None` when any step fails.
    pub async fn extract_thumbnail(
        &self,
        file: &SourceFile,
        creator: Option<String>,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let logger = JobLogger::new(&JobId::new(), "thumbnail", &file.name);
        let metadata = match self.resources.probe().probe(&file.path, cancel).await {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "Probe failed, extracting thumbnail blind");
                VideoMetadata::unknown()
            }
        };
        let upload_meta = UploadMetadata {
            creator,
            ..UploadMetadata::default()
        };
        let url = self
            .thumbnail_url(file, &metadata, &upload_meta, cancel)
            .instrument(logger.create_span())
            .await;
        if url.is_none() {
            logger.log_warning("no thumbnail produced");
        }
        url
    }

    async fn thumbnail_url(
        &self,
        file: &SourceFile,
        metadata: &VideoMetadata,
        upload_meta: &UploadMetadata,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let extractor = ThumbnailExtractor::new(Arc::clone(self.resources.frames()))
            .with_engine(Arc::clone(self.resources.engine()))
            .with_config(self.config.thumbnail.clone());

        let thumbnail = extractor.extract(file, metadata, cancel).await?;
        let result = self
            .resources
            .uploader()
            .upload_thumbnail(&thumbnail, upload_meta, cancel)
            .await;
        let url = result.url?;
        let thumbnail = thumbnail.persisted_at(url.clone());
        debug!(
            url = ?thumbnail.remote_url,
            width = thumbnail.width,
            height = thumbnail.height,
            "Thumbnail persisted"
        );
        Some(url)
    }

    fn scratch_dir(&self) -> PipelineResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("skatehive-");
        let dir = match &self.config.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

fn ensure_active(cancel: &CancellationToken) -> PipelineResult<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

fn transcode_error(err: MediaError, context: &str) -> PipelineError {
    if err.is_cancelled() {
        PipelineError::Cancelled
    } else {
        PipelineError::transcode(format!("{}: {}", context, err))
    }
}
