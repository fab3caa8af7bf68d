// Pipeline orchestrator: routes one input to the image or video path
//
// Built once at startup and shared across requests. Each `run` is independent
// and blocking; callers are expected to run it off the async executor.

use std::path::Path;
use std::sync::Arc;

use crate::artifacts::ArtifactStore;
use crate::error::PipelineResult;
use crate::pipeline::detection::FrameDetector;
use crate::pipeline::image_analyzer::ImageAnalyzer;
use crate::pipeline::transcode::Transcoder;
use crate::pipeline::types::{Analysis, MediaKind, PipelineConfig};
use crate::pipeline::video_pipeline::VideoPipeline;
use crate::video::VideoBackend;

pub struct MediaPipeline {
    images: ImageAnalyzer,
    videos: VideoPipeline,
    store: Arc<ArtifactStore>,
}

impl MediaPipeline {
    pub fn new(
        detector: FrameDetector,
        backend: Arc<dyn VideoBackend>,
        transcoder: Arc<dyn Transcoder>,
        store: Arc<ArtifactStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            images: ImageAnalyzer::new(detector.clone(), store.clone()),
            videos: VideoPipeline::new(detector, backend, transcoder, store.clone(), config),
            store,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Analyze `path` as the given kind. The kind is decided by the caller
    /// (normally from the file extension) and is not second-guessed here.
    pub fn run(&self, path: &Path, kind: MediaKind) -> PipelineResult<Analysis> {
        tracing::info!("Running {:?} pipeline on {:?}", kind, path);
        match kind {
            MediaKind::Image => self.images.analyze(path).map(Analysis::Image),
            MediaKind::Video => self.videos.process(path).map(Analysis::Video),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ImageNaming;
    use crate::pipeline::detection::tests::{frame_detector, FixedDetector};
    use crate::pipeline::transcode::DisabledTranscoder;
    use crate::video::{VideoProperties, VideoReader, VideoWriter};
    use anyhow::{anyhow, Result};
    use image::RgbImage;

    /// Backend that cannot open anything; image requests never touch it.
    struct NoVideo;

    impl VideoBackend for NoVideo {
        fn open_reader(&self, _path: &Path) -> Result<Box<dyn VideoReader>> {
            Err(anyhow!("no decoder"))
        }

        fn open_writer(
            &self,
            _path: &Path,
            _properties: &VideoProperties,
        ) -> Result<Box<dyn VideoWriter>> {
            Err(anyhow!("no encoder"))
        }
    }

    fn media_pipeline(dir: &Path) -> MediaPipeline {
        let store = ArtifactStore::open(dir, ImageNaming::Request, 5).unwrap();
        MediaPipeline::new(
            frame_detector(FixedDetector::single("object", 0.9)),
            Arc::new(NoVideo),
            Arc::new(DisabledTranscoder),
            Arc::new(store),
            PipelineConfig::default(),
        )
    }

    #[test]
    fn test_text_file_routed_to_image_path_fails_decode() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("readme.txt");
        std::fs::write(&input, "hello").unwrap();

        let pipeline = media_pipeline(dir.path());
        let kind = MediaKind::from_path(&input);
        assert_eq!(kind, MediaKind::Image);
        assert!(pipeline.run(&input, kind).unwrap_err().is_decode());
    }

    #[test]
    fn test_image_run_returns_image_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("frame.png");
        RgbImage::new(40, 30).save(&input).unwrap();

        let analysis = media_pipeline(dir.path())
            .run(&input, MediaKind::Image)
            .unwrap();
        assert_eq!(analysis.kind(), MediaKind::Image);

        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["dimensions"], "40x30");
        assert_eq!(json["detections"][0]["class"], "object");
        assert!(json["result_image"].as_str().unwrap().starts_with("result_"));
    }

    #[test]
    fn test_unopenable_video_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = media_pipeline(dir.path())
            .run(Path::new("missing.mp4"), MediaKind::Video)
            .unwrap_err();
        assert!(err.is_decode());
    }
}
