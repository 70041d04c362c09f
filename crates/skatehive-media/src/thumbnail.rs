//! Thumbnail extraction.
//!
//! Best effort by contract: every failure is logged and reported as `None`
//! so a missing thumbnail never blocks an upload.

use std::sync::Arc;

use skatehive_models::encoding::{THUMBNAIL_HEIGHT, THUMBNAIL_JPEG_QUALITY, THUMBNAIL_WIDTH};
use skatehive_models::{SourceFile, ThumbnailArtifact, VideoMetadata};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::canvas::{oriented, Canvas};
use crate::decode::FrameSource;
use crate::engine::EngineHandle;
use crate::error::{MediaError, MediaResult};

const MB: u64 = 1024 * 1024;

/// Seek point used when the duration is unknown.
const DEFAULT_SEEK_SECS: f64 = 1.0;
const MIN_SEEK_SECS: f64 = 0.5;
const MAX_SEEK_SECS: f64 = 2.0;

/// Thumbnail settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailConfig {
    /// Landscape canvas width
    pub width: u32,
    /// Landscape canvas height
    pub height: u32,
    pub jpeg_quality: u8,
    /// Largest file the engine path is attempted on
    pub accurate_max_bytes: u64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: THUMBNAIL_WIDTH,
            height: THUMBNAIL_HEIGHT,
            jpeg_quality: THUMBNAIL_JPEG_QUALITY,
            accurate_max_bytes: 150 * MB,
        }
    }
}

/// Where to take the thumbnail from, in seconds.
///
/// `None` means the video has no usable frames (zero or negative length).
pub fn seek_point(duration_secs: Option<f64>) -> Option<f64> {
    match duration_secs {
        None => Some(DEFAULT_SEEK_SECS),
        Some(d) if !d.is_finite() => Some(DEFAULT_SEEK_SECS),
        Some(d) if d <= 0.0 => None,
        Some(d) => Some((d * 0.1).clamp(MIN_SEEK_SECS, MAX_SEEK_SECS).min(d / 2.0)),
    }
}

/// Produces a still image for a video.
pub struct ThumbnailExtractor {
    frames: Arc<dyn FrameSource>,
    engine: Option<Arc<EngineHandle>>,
    config: ThumbnailConfig,
}

impl ThumbnailExtractor {
    pub fn new(frames: Arc<dyn FrameSource>) -> Self {
        Self {
            frames,
            engine: None,
            config: ThumbnailConfig::default(),
        }
    }

    /// Allow the engine-backed path as a second attempt.
    pub fn with_engine(mut self, engine: Arc<EngineHandle>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_config(mut self, config: ThumbnailConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract a JPEG thumbnail, or `None`.
    pub async fn extract(
        &self,
        file: &SourceFile,
        metadata: &VideoMetadata,
        cancel: &CancellationToken,
    ) -> Option<ThumbnailArtifact> {
        let Some(at) = seek_point(metadata.duration_secs) else {
            debug!(file = %file.name, "Video has no duration, skipping thumbnail");
            return None;
        };

        match self.fast_path(file, metadata, at, cancel).await {
            Ok(thumb) => {
                info!(file = %file.name, at, "Thumbnail captured");
                return Some(thumb);
            }
            Err(e) => debug!(file = %file.name, error = %e, "Fast thumbnail path failed"),
        }

        if cancel.is_cancelled() {
            return None;
        }

        if file.size > self.config.accurate_max_bytes {
            warn!(
                file = %file.name,
                size_mb = file.size_mb(),
                "Thumbnail unavailable; file too large for engine extraction"
            );
            return None;
        }

        match self.accurate_path(file, metadata, at, cancel).await {
            Ok(thumb) => {
                info!(file = %file.name, at, "Thumbnail captured by engine");
                Some(thumb)
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "Thumbnail unavailable");
                None
            }
        }
    }

    fn canvas_size(&self, portrait: bool) -> (u32, u32) {
        oriented(self.config.width, self.config.height, portrait)
    }

    async fn fast_path(
        &self,
        file: &SourceFile,
        metadata: &VideoMetadata,
        at: f64,
        cancel: &CancellationToken,
    ) -> MediaResult<ThumbnailArtifact> {
        let (max_w, max_h) = self.canvas_size(metadata.is_portrait());
        let frame = self
            .frames
            .grab_frame(&file.path, at, max_w.max(max_h), max_w.max(max_h), cancel)
            .await?;

        let portrait = metadata
            .dimensions()
            .map(|(w, h)| h > w)
            .unwrap_or_else(|| frame.is_portrait());
        let (width, height) = self.canvas_size(portrait);

        let mut canvas = Canvas::new(width, height);
        canvas.draw(&frame)?;
        let bytes = canvas.encode_jpeg(self.config.jpeg_quality)?;
        Ok(ThumbnailArtifact::jpeg(bytes, width, height))
    }

    async fn accurate_path(
        &self,
        file: &SourceFile,
        metadata: &VideoMetadata,
        at: f64,
        cancel: &CancellationToken,
    ) -> MediaResult<ThumbnailArtifact> {
        let handle = self
            .engine
            .as_ref()
            .ok_or_else(|| MediaError::Unsupported("no engine configured".to_string()))?;
        let engine = handle.get(cancel).await?;

        let (width, height) = self.canvas_size(metadata.is_portrait());
        let output = tempfile::Builder::new()
            .prefix("thumb-")
            .suffix(".jpg")
            .tempfile()?
            .into_temp_path();

        engine
            .extract_frame(&file.path, at, width, height, &output, cancel)
            .await?;
        let bytes = tokio::fs::read(&output).await?;
        if bytes.is_empty() {
            return Err(MediaError::invalid_video("empty thumbnail"));
        }
        Ok(ThumbnailArtifact::jpeg(bytes, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RgbaFrame;
    use crate::engine::{EngineLoader, TranscodeEngine};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFrames {
        frame: Option<RgbaFrame>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FrameSource for StaticFrames {
        async fn grab_frame(
            &self,
            _path: &Path,
            _at_secs: f64,
            _max_width: u32,
            _max_height: u32,
            cancel: &CancellationToken,
        ) -> MediaResult<RgbaFrame> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return Err(MediaError::Cancelled);
            }
            self.frame
                .clone()
                .ok_or_else(|| MediaError::invalid_video("corrupt"))
        }
    }

    struct BrokenLoader;

    #[async_trait]
    impl EngineLoader for BrokenLoader {
        async fn load(&self) -> MediaResult<Arc<dyn TranscodeEngine>> {
            Err(MediaError::engine_unavailable("not installed"))
        }
    }

    fn source(size: u64) -> SourceFile {
        SourceFile::new("/tmp/clip.mp4", "clip.mp4", "video/mp4", size, Utc::now())
    }

    fn frames(frame: Option<RgbaFrame>) -> Arc<StaticFrames> {
        Arc::new(StaticFrames {
            frame,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_seek_point() {
        assert_eq!(seek_point(None), Some(1.0));
        assert_eq!(seek_point(Some(0.0)), None);
        assert_eq!(seek_point(Some(-3.0)), None);
        assert_eq!(seek_point(Some(10.0)), Some(1.0));
        assert_eq!(seek_point(Some(60.0)), Some(2.0));
        assert_eq!(seek_point(Some(4.0)), Some(0.5));
        // Very short clips stay inside the video
        assert_eq!(seek_point(Some(0.4)), Some(0.2));
    }

    #[tokio::test]
    async fn test_fast_path_letterboxes_portrait() {
        let frame = RgbaFrame::new(18, 32, vec![255; 18 * 32 * 4]).unwrap();
        let extractor = ThumbnailExtractor::new(frames(Some(frame)));
        let meta = VideoMetadata {
            duration_secs: Some(12.0),
            width: Some(1080),
            height: Some(1920),
            ..Default::default()
        };

        let thumb = extractor
            .extract(&source(1024), &meta, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((thumb.width, thumb.height), (360, 640));
        assert_eq!(thumb.mime_type, "image/jpeg");
        assert_eq!(&thumb.bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_cancelled_extract_is_none() {
        let frame = RgbaFrame::new(32, 18, vec![255; 32 * 18 * 4]).unwrap();
        let source_frames = frames(Some(frame));
        let extractor = ThumbnailExtractor::new(source_frames.clone());
        let meta = VideoMetadata {
            duration_secs: Some(12.0),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(extractor.extract(&source(1024), &meta, &cancel).await.is_none());
        assert_eq!(source_frames.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_duration_is_none() {
        let source_frames = frames(None);
        let extractor = ThumbnailExtractor::new(source_frames.clone());
        let meta = VideoMetadata {
            duration_secs: Some(0.0),
            ..Default::default()
        };
        assert!(extractor
            .extract(&source(1024), &meta, &CancellationToken::new())
            .await
            .is_none());
        assert_eq!(source_frames.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corrupt_input_is_none() {
        let handle = Arc::new(EngineHandle::new(Arc::new(BrokenLoader)));
        let extractor = ThumbnailExtractor::new(frames(None)).with_engine(handle);
        let thumb = extractor
            .extract(&source(1024), &VideoMetadata::unknown(), &CancellationToken::new())
            .await;
        assert!(thumb.is_none());
    }

    #[tokio::test]
    async fn test_large_file_skips_engine() {
        let handle = Arc::new(EngineHandle::new(Arc::new(BrokenLoader)));
        let extractor = ThumbnailExtractor::new(frames(None)).with_engine(handle.clone());
        let thumb = extractor
            .extract(&source(200 * MB), &VideoMetadata::unknown(), &CancellationToken::new())
            .await;
        assert!(thumb.is_none());
        assert_eq!(handle.state(), crate::engine::EngineState::Uninitialized);
    }
}
