//! Transcoding engine abstraction and lifecycle.
//!
//! Engines are expensive to bring up, so callers hold an [`EngineHandle`]
//! that loads one lazily on first use and keeps it until disposed. Every
//! transcode call runs as a [`TranscodeJob`] carrying its own status,
//! progress and cancellation token.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use skatehive_models::source::PROCESSED_MARKER;
use skatehive_models::{
    DeviceProfile, EncodingProfile, JobId, ProcessingDecision, ProgressReporter, SourceFile,
    Stage, Strategy, TranscodeStatus, VideoMetadata,
};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

const JOBS_TOTAL: &str = "skatehive_transcode_jobs_total";
const JOB_DURATION: &str = "skatehive_transcode_duration_seconds";

/// How the source is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeMode {
    /// Container change only, streams copied
    Repack,
    /// Full re-encode
    Full,
}

/// Input of one transcode call.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub source: SourceFile,
    pub mode: TranscodeMode,
    pub profile: EncodingProfile,
    /// Device asked for the conservative tier
    pub constrained: bool,
    /// Best-effort metadata of the source
    pub metadata: VideoMetadata,
    /// Directory that receives the artifact
    pub output_dir: PathBuf,
}

impl TranscodeRequest {
    /// Request derived from a classification decision.
    pub fn for_decision(
        source: SourceFile,
        decision: &ProcessingDecision,
        device: &DeviceProfile,
        metadata: VideoMetadata,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        let mode = match decision.strategy() {
            Strategy::ContainerRepack => TranscodeMode::Repack,
            _ => TranscodeMode::Full,
        };
        let constrained = device.is_constrained();
        Self {
            source,
            mode,
            profile: EncodingProfile::for_constrained(constrained),
            constrained,
            metadata,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Same request as a full re-encode.
    pub fn as_full(&self) -> Self {
        Self {
            mode: TranscodeMode::Full,
            ..self.clone()
        }
    }

    /// Artifact path: `<stem>_processed.<ext>` inside the output directory.
    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{}{}.{}",
            self.source.stem(),
            PROCESSED_MARKER,
            extension
        ))
    }
}

/// File produced by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodedArtifact {
    pub path: PathBuf,
    pub mime_type: String,
    pub size: u64,
    /// Name of the engine that produced it
    pub engine: String,
}

impl TranscodedArtifact {
    /// File name of the artifact.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// A video transcoding engine.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Short engine name for logs and outcomes.
    fn name(&self) -> &'static str;

    /// Produce the delivery artifact for `request`.
    ///
    /// Progress is reported under [`Stage::Transcoding`]. Engines never fall
    /// back to another engine by themselves.
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> MediaResult<TranscodedArtifact>;

    /// Write one JPEG frame taken at `at_secs`, letterboxed to
    /// `width`x`height`, to `output`. Stops early when `cancel` fires.
    async fn extract_frame(
        &self,
        _source: &Path,
        _at_secs: f64,
        _width: u32,
        _height: u32,
        _output: &Path,
        _cancel: &CancellationToken,
    ) -> MediaResult<()> {
        Err(MediaError::Unsupported(format!(
            "{} cannot extract frames",
            self.name()
        )))
    }
}

/// Brings an engine up.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> MediaResult<Arc<dyn TranscodeEngine>>;
}

/// Lifecycle of an [`EngineHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Disposed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Loading => "loading",
            EngineState::Ready => "ready",
            EngineState::Disposed => "disposed",
        };
        write!(f, "{}", s)
    }
}

enum Slot {
    Empty,
    Loaded(Arc<dyn TranscodeEngine>),
    Disposed,
}

/// Owned, lazily loaded engine instance.
///
/// Loads are serialized: concurrent callers wait for the first load and
/// share its engine. A failed load leaves the handle uninitialized so the
/// next call retries. After [`dispose`](Self::dispose) the handle refuses
/// to load again.
pub struct EngineHandle {
    loader: Arc<dyn EngineLoader>,
    slot: Mutex<Slot>,
    state: watch::Sender<EngineState>,
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl EngineHandle {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        let (state, _) = watch::channel(EngineState::Uninitialized);
        Self {
            loader,
            slot: Mutex::new(Slot::Empty),
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Return the engine, loading it first if needed.
    pub async fn get(&self, cancel: &CancellationToken) -> MediaResult<Arc<dyn TranscodeEngine>> {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let mut slot = tokio::select! {
            guard = self.slot.lock() => guard,
            _ = cancel.cancelled() => return Err(MediaError::Cancelled),
        };

        match &*slot {
            Slot::Loaded(engine) => return Ok(Arc::clone(engine)),
            Slot::Disposed => return Err(MediaError::EngineDisposed),
            Slot::Empty => {}
        }

        self.state.send_replace(EngineState::Loading);
        info!("Loading video engine");

        let loaded = tokio::select! {
            result = self.loader.load() => result,
            _ = cancel.cancelled() => Err(MediaError::Cancelled),
        };

        match loaded {
            Ok(engine) => {
                info!(engine = engine.name(), "Video engine ready");
                *slot = Slot::Loaded(Arc::clone(&engine));
                self.state.send_replace(EngineState::Ready);
                Ok(engine)
            }
            Err(e) => {
                warn!(error = %e, "Video engine failed to load");
                self.state.send_replace(EngineState::Uninitialized);
                Err(e)
            }
        }
    }

    /// Drop the engine and refuse further loads.
    pub async fn dispose(&self) {
        let mut slot = self.slot.lock().await;
        if !matches!(*slot, Slot::Disposed) {
            debug!("Disposing video engine");
        }
        *slot = Slot::Disposed;
        self.state.send_replace(EngineState::Disposed);
    }
}

/// One transcode call: identity, status and cancellation.
#[derive(Debug)]
pub struct TranscodeJob {
    id: JobId,
    status: TranscodeStatus,
    cancel: CancellationToken,
    progress: ProgressReporter,
}

impl TranscodeJob {
    /// Job reporting through `progress`, cancelled by `cancel` or any of
    /// its parents.
    pub fn new(progress: ProgressReporter, cancel: CancellationToken) -> Self {
        Self {
            id: JobId::new(),
            status: TranscodeStatus::Pending,
            cancel,
            progress,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn status(&self) -> TranscodeStatus {
        self.status
    }

    /// Transcoding progress, 0-100. Never decreases and is 100 once the
    /// job has completed.
    pub fn progress(&self) -> f32 {
        match self.progress.last() {
            _ if self.status == TranscodeStatus::Completed => 100.0,
            Some(event) if event.stage == Stage::Transcoding => event.percent,
            Some(event) if event.stage > Stage::Transcoding => 100.0,
            _ => 0.0,
        }
    }

    /// Request early termination.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn transition(&mut self, next: TranscodeStatus) {
        if self.status.can_transition_to(next) {
            debug!(job_id = %self.id, from = %self.status, to = %next, "Transcode job transition");
            self.status = next;
        }
    }

    /// Run `engine` on `request` under this job.
    pub async fn run(
        &mut self,
        engine: &dyn TranscodeEngine,
        request: &TranscodeRequest,
    ) -> MediaResult<TranscodedArtifact> {
        if self.cancel.is_cancelled() {
            self.transition(TranscodeStatus::Cancelled);
            return Err(MediaError::Cancelled);
        }

        self.transition(TranscodeStatus::Running);
        info!(
            job_id = %self.id,
            engine = engine.name(),
            mode = ?request.mode,
            source = %request.source.name,
            "Transcode started"
        );

        let started = Instant::now();
        let result = engine.transcode(request, &self.progress, &self.cancel).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(_) => "failure",
        };
        counter!(JOBS_TOTAL, "engine" => engine.name(), "outcome" => outcome).increment(1);
        histogram!(JOB_DURATION, "engine" => engine.name()).record(started.elapsed().as_secs_f64());

        match &result {
            Ok(artifact) => {
                self.progress.finish(Stage::Transcoding);
                self.transition(TranscodeStatus::Completed);
                info!(
                    job_id = %self.id,
                    engine = engine.name(),
                    output_size = artifact.size,
                    "Transcode completed"
                );
            }
            Err(MediaError::Cancelled) => {
                self.transition(TranscodeStatus::Cancelled);
                info!(job_id = %self.id, "Transcode cancelled");
            }
            Err(e) => {
                self.transition(TranscodeStatus::Failed);
                warn!(job_id = %self.id, engine = engine.name(), error = %e, "Transcode failed");
            }
        }

        result
    }
}
