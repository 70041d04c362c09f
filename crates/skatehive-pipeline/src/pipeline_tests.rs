//! Tests for the ingest pipeline with fake engines and a mock store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use skatehive_media::{
    EngineLoader, EngineState, FrameSource, MediaError, MediaProbe, MediaResult, RgbaFrame,
    TranscodeEngine, TranscodeRequest, TranscodedArtifact,
};
use skatehive_models::{
    EnvironmentSnapshot, ProgressEvent, ProgressReporter, SourceFile, Stage, Strategy,
    VideoMetadata,
};
use skatehive_storage::{UploadConfig, UploadManager};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{IngestRequest, VideoPipeline};
use crate::resources::ResourceManager;

// =============================================================================
// Fakes
// =============================================================================

const MB: u64 = 1024 * 1024;

const DESKTOP_SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";

struct FakeProbe {
    metadata: Option<VideoMetadata>,
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, _path: &Path, _cancel: &CancellationToken) -> MediaResult<VideoMetadata> {
        self.metadata.clone().ok_or(MediaError::FfprobeNotFound)
    }
}

struct FakeEngine {
    name: &'static str,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeEngine {
    fn new(name: &'static str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &ProgressReporter,
        _cancel: &CancellationToken,
    ) -> MediaResult<TranscodedArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress.report(Stage::Transcoding, 50.0);
        if self.fail {
            return Err(MediaError::ffmpeg_failed("encoder crashed", None, Some(1)));
        }

        tokio::fs::create_dir_all(&request.output_dir).await?;
        let output = request.output_path("mp4");
        tokio::fs::write(&output, b"processed video").await?;
        Ok(TranscodedArtifact {
            path: output,
            mime_type: "video/mp4".to_string(),
            size: 15,
            engine: self.name.to_string(),
        })
    }
}

struct FakeLoader {
    engine: Option<Arc<FakeEngine>>,
    loads: AtomicUsize,
}

#[async_trait]
impl EngineLoader for FakeLoader {
    async fn load(&self) -> MediaResult<Arc<dyn TranscodeEngine>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match &self.engine {
            Some(engine) => Ok(Arc::clone(engine) as Arc<dyn TranscodeEngine>),
            None => Err(MediaError::engine_unavailable("no engine in tests")),
        }
    }
}

struct FakeFrames {
    ok: bool,
}

#[async_trait]
impl FrameSource for FakeFrames {
    async fn grab_frame(
        &self,
        _path: &Path,
        _at_secs: f64,
        _max_width: u32,
        _max_height: u32,
        _cancel: &CancellationToken,
    ) -> MediaResult<RgbaFrame> {
        if self.ok {
            RgbaFrame::new(32, 18, vec![128; 32 * 18 * 4])
        } else {
            Err(MediaError::invalid_video("corrupt frame"))
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    server: MockServer,
    dir: TempDir,
    primary: Option<Arc<FakeEngine>>,
    fallback: Arc<FakeEngine>,
    loader: Arc<FakeLoader>,
    pipeline: VideoPipeline,
}

struct Setup {
    primary_fails: bool,
    primary_loads: bool,
    fallback_fails: bool,
    frames_ok: bool,
    metadata: Option<VideoMetadata>,
    store_status: u16,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            primary_fails: false,
            primary_loads: true,
            fallback_fails: false,
            frames_ok: true,
            metadata: Some(clip_metadata(12.0)),
            store_status: 200,
        }
    }
}

fn clip_metadata(duration: f64) -> VideoMetadata {
    VideoMetadata {
        duration_secs: Some(duration),
        width: Some(1920),
        height: Some(1080),
        ..Default::default()
    }
}

async fn harness(setup: Setup) -> Harness {
    let server = MockServer::start().await;
    let response = if setup.store_status == 200 {
        ResponseTemplate::new(200).set_body_json(json!({"IpfsHash": "QmStored"}))
    } else {
        ResponseTemplate::new(setup.store_status).set_body_string("store unavailable")
    };
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(response)
        .mount(&server)
        .await;

    let mut upload = UploadConfig::default()
        .with_base_url(&format!("{}/api", server.uri()))
        .unwrap();
    upload.gateway_url = "https://gateway.test/ipfs/".to_string();
    let config = PipelineConfig {
        upload: upload.clone(),
        ..Default::default()
    };

    let primary = setup
        .primary_loads
        .then(|| FakeEngine::new("primary", setup.primary_fails));
    let fallback = FakeEngine::new("fallback", setup.fallback_fails);
    let loader = Arc::new(FakeLoader {
        engine: primary.clone(),
        loads: AtomicUsize::new(0),
    });

    let resources = ResourceManager::new(
        loader.clone(),
        fallback.clone(),
        Arc::new(FakeFrames {
            ok: setup.frames_ok,
        }),
        Arc::new(FakeProbe {
            metadata: setup.metadata,
        }),
        UploadManager::new(upload).unwrap(),
    );

    Harness {
        server,
        dir: tempfile::tempdir().unwrap(),
        primary,
        fallback,
        loader,
        pipeline: VideoPipeline::new(Arc::new(resources), config),
    }
}

impl Harness {
    /// Write a small file with a recognizable container header.
    ///
    /// `claimed_size` overrides the recorded size for policy checks; such
    /// files must never reach the store as-is.
    async fn source(
        &self,
        name: &str,
        mime: &str,
        header: &[u8],
        claimed_size: Option<u64>,
    ) -> SourceFile {
        let path: PathBuf = self.dir.path().join(name);
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(&[b'x'; 64]);
        tokio::fs::write(&path, &bytes).await.unwrap();
        let size = claimed_size.unwrap_or(bytes.len() as u64);
        SourceFile::new(path, name, mime, size, Utc::now())
    }

    async fn mp4(&self) -> SourceFile {
        self.source("line.mp4", "video/mp4", &ftyp(b"isom"), None).await
    }

    async fn mp4_claiming(&self, size: u64) -> SourceFile {
        self.source("line.mp4", "video/mp4", &ftyp(b"isom"), Some(size))
            .await
    }

    async fn mov(&self) -> SourceFile {
        self.source("IMG_0042.MOV", "video/quicktime", &ftyp(b"qt  "), Some(80 * MB))
            .await
    }

    async fn uploaded_bodies(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| String::from_utf8_lossy(&r.body).to_string())
            .collect()
    }
}

fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
    let mut header = vec![0x00, 0x00, 0x00, 0x14];
    header.extend_from_slice(b"ftyp");
    header.extend_from_slice(brand);
    header.extend_from_slice(&[0, 0, 0, 0]);
    header
}

fn desktop(hp: f64) -> IngestRequest {
    IngestRequest::new(hp, EnvironmentSnapshot::from_user_agent(DESKTOP_SAFARI))
        .with_creator("skater")
}

fn no_engine_runtime(hp: f64) -> IngestRequest {
    IngestRequest::new(
        hp,
        EnvironmentSnapshot::from_user_agent(DESKTOP_SAFARI).with_capabilities(true, false),
    )
}

fn recording() -> (ProgressReporter, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let reporter = ProgressReporter::new(move |e| sink.lock().unwrap().push(e));
    (reporter, events)
}

// =============================================================================
// Strategy and engines
// =============================================================================

#[tokio::test]
async fn test_mp4_is_uploaded_untouched() {
    let h = harness(Setup::default()).await;
    let file = h.mp4().await;

    let outcome = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.decision.strategy(), Strategy::Skip);
    assert!(outcome.engine_used.is_none());
    assert!(outcome.upload.success);
    assert_eq!(
        outcome.upload.url.as_deref(),
        Some("https://gateway.test/ipfs/QmStored")
    );
    assert!(outcome.thumbnail_url.is_some());
    assert_eq!(h.pipeline.resources().engine().state(), EngineState::Uninitialized);

    let bodies = h.uploaded_bodies().await;
    assert_eq!(bodies.len(), 2);
    assert!(bodies.iter().any(|b| b.contains("filename=\"line.mp4\"")));
    assert!(bodies.iter().any(|b| b.contains("filename=\"thumbnail.jpg\"")));
}

#[tokio::test]
async fn test_quicktime_is_repacked_by_primary() {
    let h = harness(Setup::default()).await;
    let file = h.mov().await;

    let outcome = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.decision.strategy(), Strategy::ContainerRepack);
    assert_eq!(outcome.engine_used.as_deref(), Some("primary"));
    assert_eq!(h.fallback.calls(), 0);
    assert!(h
        .uploaded_bodies()
        .await
        .iter()
        .any(|b| b.contains("filename=\"IMG_0042_processed.mp4\"")));
}

#[tokio::test]
async fn test_engine_is_loaded_once_across_runs() {
    let h = harness(Setup::default()).await;
    let file = h.mov().await;

    for _ in 0..2 {
        h.pipeline
            .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
            .await
            .unwrap();
    }
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(h.primary.as_ref().unwrap().calls(), 2);
}

#[tokio::test]
async fn test_primary_failure_uses_fallback() {
    let h = harness(Setup {
        primary_fails: true,
        ..Default::default()
    })
    .await;
    let file = h.mov().await;

    let outcome = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.engine_used.as_deref(), Some("fallback"));
    assert_eq!(h.primary.as_ref().unwrap().calls(), 1);
    assert_eq!(h.fallback.calls(), 1);
}

#[tokio::test]
async fn test_unloadable_primary_uses_fallback() {
    let h = harness(Setup {
        primary_loads: false,
        ..Default::default()
    })
    .await;
    let file = h.mov().await;

    let outcome = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.engine_used.as_deref(), Some("fallback"));
}

#[tokio::test]
async fn test_fallback_only_failure_is_fatal() {
    let h = harness(Setup {
        fallback_fails: true,
        ..Default::default()
    })
    .await;
    let file = h
        .source("clip.webm", "video/webm", &[0x1A, 0x45, 0xDF, 0xA3], None)
        .await;

    let err = h
        .pipeline
        .process(
            &file,
            &no_engine_runtime(0.0),
            &ProgressReporter::noop(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transcode(_)), "{err:?}");
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 0);
    assert!(h.uploaded_bodies().await.is_empty());
}

#[tokio::test]
async fn test_oversized_file_is_compressed() {
    let h = harness(Setup::default()).await;
    let file = h.mp4_claiming(1100 * MB).await;

    let outcome = h
        .pipeline
        .process(&file, &desktop(150.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.decision.strategy(), Strategy::WasmTranscode);
    assert_eq!(outcome.engine_used.as_deref(), Some("primary"));
}

// =============================================================================
// Policy
// =============================================================================

#[tokio::test]
async fn test_size_rejected_without_hp() {
    let h = harness(Setup::default()).await;
    let file = h.mp4_claiming(600 * MB).await;

    let err = h
        .pipeline
        .process(&file, &desktop(99.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::Rejected(reason) => assert!(reason.contains("1.0 short"), "{reason}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.uploaded_bodies().await.is_empty());
}

#[tokio::test]
async fn test_duration_gated_by_hp() {
    let h = harness(Setup {
        metadata: Some(clip_metadata(30.0)),
        ..Default::default()
    })
    .await;
    let file = h.mp4().await;

    let err = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_user_error());
    assert!(err.user_message().contains("HP"));

    let outcome = h
        .pipeline
        .process(&file, &desktop(100.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.upload.success);
}

#[tokio::test]
async fn test_unknown_metadata_is_not_fatal() {
    let h = harness(Setup {
        metadata: None,
        ..Default::default()
    })
    .await;
    let file = h.mp4().await;

    let outcome = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.metadata, VideoMetadata::unknown());
    assert!(outcome.upload.success);
}

// =============================================================================
// Thumbnail, progress, cancellation and upload failures
// =============================================================================

#[tokio::test]
async fn test_thumbnail_failure_does_not_block_upload() {
    let h = harness(Setup {
        frames_ok: false,
        primary_loads: false,
        ..Default::default()
    })
    .await;
    let file = h.mp4().await;

    let outcome = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.thumbnail_url.is_none());
    assert!(outcome.upload.success);
    assert_eq!(h.uploaded_bodies().await.len(), 1);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes() {
    let h = harness(Setup::default()).await;
    let file = h.mov().await;
    let (reporter, events) = recording();

    h.pipeline
        .process(&file, &desktop(0.0), &reporter, &CancellationToken::new())
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(events.windows(2).all(|w| {
        w[0].stage < w[1].stage || (w[0].stage == w[1].stage && w[0].percent < w[1].percent)
    }));
    let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
    for stage in [
        Stage::Validating,
        Stage::Classifying,
        Stage::Transcoding,
        Stage::Thumbnail,
        Stage::Uploading,
    ] {
        assert!(stages.contains(&stage), "missing {stage}");
    }
    let last = events.last().unwrap();
    assert_eq!((last.stage, last.percent), (Stage::Complete, 100.0));
}

#[tokio::test]
async fn test_cancelled_run() {
    let h = harness(Setup::default()).await;
    let file = h.mov().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(h.primary.as_ref().unwrap().calls(), 0);
    assert!(h.uploaded_bodies().await.is_empty());
}

#[tokio::test]
async fn test_upload_failure_is_reported() {
    let h = harness(Setup {
        store_status: 500,
        ..Default::default()
    })
    .await;
    let file = h.mp4().await;

    let err = h
        .pipeline
        .process(&file, &desktop(0.0), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::UploadFailed(msg) => assert!(msg.contains("HTTP 500"), "{msg}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_extract_thumbnail() {
    let h = harness(Setup::default()).await;
    let file = h.mp4().await;

    let url = h
        .pipeline
        .extract_thumbnail(&file, None, &CancellationToken::new())
        .await;
    assert_eq!(url.as_deref(), Some("https://gateway.test/ipfs/QmStored"));

    let h = harness(Setup {
        metadata: Some(clip_metadata(0.0)),
        ..Default::default()
    })
    .await;
    let file = h.mp4().await;
    assert!(h
        .pipeline
        .extract_thumbnail(&file, None, &CancellationToken::new())
        .await
        .is_none());
}
