//! Long-lived resources shared by every run.

use std::path::PathBuf;
use std::sync::Arc;

use skatehive_media::{
    EngineHandle, EngineLoader, FfmpegFrameSource, FfmpegLoader, FfprobeProbe, FrameRelayEngine,
    FrameSource, MediaProbe, TranscodeEngine,
};
use skatehive_storage::UploadManager;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;

/// Owns the engines, probe and uploader.
///
/// The primary engine is loaded lazily on first use and kept until
/// [`ResourceManager::shutdown`].
pub struct ResourceManager {
    engine: Arc<EngineHandle>,
    fallback: Arc<dyn TranscodeEngine>,
    frames: Arc<dyn FrameSource>,
    probe: Arc<dyn MediaProbe>,
    uploader: UploadManager,
}

impl ResourceManager {
    /// Assemble from explicit parts.
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        fallback: Arc<dyn TranscodeEngine>,
        frames: Arc<dyn FrameSource>,
        probe: Arc<dyn MediaProbe>,
        uploader: UploadManager,
    ) -> Self {
        Self {
            engine: Arc::new(EngineHandle::new(loader)),
            fallback,
            frames,
            probe,
            uploader,
        }
    }

    /// FFmpeg-backed resources described by `config`.
    pub fn from_config(config: &PipelineConfig) -> PipelineResult<Self> {
        let ffmpeg = config
            .ffmpeg_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        let ffprobe = config
            .ffprobe_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffprobe"));

        let mut loader = FfmpegLoader::new().with_timeout(config.transcode_timeout);
        if let Some(path) = &config.ffmpeg_path {
            loader = loader.with_binary(path);
        }
        let fallback =
            FrameRelayEngine::new(&ffmpeg).with_load_timeout(config.fallback_load_timeout);

        info!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            upload_url = %config.upload.upload_url,
            "Pipeline resources configured"
        );

        Ok(Self::new(
            Arc::new(loader),
            Arc::new(fallback),
            Arc::new(FfmpegFrameSource::new(&ffmpeg)),
            Arc::new(FfprobeProbe::new(&ffprobe)),
            UploadManager::new(config.upload.clone())?,
        ))
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn fallback(&self) -> &Arc<dyn TranscodeEngine> {
        &self.fallback
    }

    pub fn frames(&self) -> &Arc<dyn FrameSource> {
        &self.frames
    }

    pub fn probe(&self) -> &Arc<dyn MediaProbe> {
        &self.probe
    }

    pub fn uploader(&self) -> &UploadManager {
        &self.uploader
    }

    /// Release the primary engine. Later runs fail over to the fallback.
    pub async fn shutdown(&self) {
        self.engine.dispose().await;
    }
}
