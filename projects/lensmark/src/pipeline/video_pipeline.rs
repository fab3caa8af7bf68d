// Video pipeline: decode -> sampled detection -> annotate -> encode -> transcode
//
// The frame loop is exposed as `FrameStream`, a lazy iterator over processed
// frames. `VideoPipeline::process` drains it into the intermediate writer and
// then hands the result to the transcoder.

use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::artifacts::{artifact_name, ArtifactStore};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::detection::FrameDetector;
use crate::pipeline::transcode::Transcoder;
use crate::pipeline::types::{
    Detection, InferencePolicy, PipelineConfig, SampleSchedule, VideoAnalysis,
};
use crate::video::{VideoBackend, VideoReader, VideoWriter};

/// What happened to a single frame on its way through the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Not on the sampling schedule; written unchanged.
    Skipped,
    /// Detector ran; the frame carries the drawn boxes.
    Detected(Vec<Detection>),
    /// Detector failed and the frame was passed through unannotated.
    Failed(String),
}

#[derive(Debug)]
pub struct ProcessedFrame {
    pub index: usize,
    /// Frame to write: annotated when detections were drawn, original otherwise.
    pub image: RgbImage,
    pub outcome: FrameOutcome,
}

/// Finite, non-restartable stream of processed frames. Dropping it releases the
/// underlying decoder.
pub struct FrameStream<'a> {
    source: PathBuf,
    reader: Box<dyn VideoReader>,
    detector: &'a FrameDetector,
    schedule: SampleSchedule,
    policy: InferencePolicy,
    next_index: usize,
    finished: bool,
}

impl<'a> FrameStream<'a> {
    pub fn new(
        source: &Path,
        reader: Box<dyn VideoReader>,
        detector: &'a FrameDetector,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            source: source.to_path_buf(),
            reader,
            detector,
            schedule: config.schedule,
            policy: config.inference_policy,
            next_index: 0,
            finished: false,
        }
    }

    /// Number of frames produced so far.
    pub fn frames_read(&self) -> usize {
        self.next_index
    }

    fn process(&self, index: usize, frame: RgbImage) -> PipelineResult<ProcessedFrame> {
        if !self.schedule.is_sampled(index) {
            return Ok(ProcessedFrame {
                index,
                image: frame,
                outcome: FrameOutcome::Skipped,
            });
        }

        match self.detector.detect(&frame, Some(index)) {
            Ok(detected) => Ok(ProcessedFrame {
                index,
                image: detected.annotated,
                outcome: FrameOutcome::Detected(detected.detections),
            }),
            Err(e) => match self.policy {
                InferencePolicy::Abort => Err(e),
                InferencePolicy::Skip => {
                    tracing::warn!(
                        "Detection failed on frame {}, writing it as-is: {}",
                        index,
                        e
                    );
                    Ok(ProcessedFrame {
                        index,
                        image: frame,
                        outcome: FrameOutcome::Failed(e.to_string()),
                    })
                }
            },
        }
    }
}

impl Iterator for FrameStream<'_> {
    type Item = PipelineResult<ProcessedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let frame = match self.reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.finished = true;
                return None;
            }
            Err(e) => {
                self.finished = true;
                return Some(Err(PipelineError::decode(
                    &self.source,
                    format!("frame {}: {e:#}", self.next_index),
                )));
            }
        };

        let index = self.next_index;
        self.next_index += 1;

        let result = self.process(index, frame);
        if result.is_err() {
            self.finished = true;
        }
        Some(result)
    }
}

pub struct VideoPipeline {
    detector: FrameDetector,
    backend: Arc<dyn VideoBackend>,
    transcoder: Arc<dyn Transcoder>,
    store: Arc<ArtifactStore>,
    config: PipelineConfig,
}

impl VideoPipeline {
    pub fn new(
        detector: FrameDetector,
        backend: Arc<dyn VideoBackend>,
        transcoder: Arc<dyn Transcoder>,
        store: Arc<ArtifactStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector,
            backend,
            transcoder,
            store,
            config,
        }
    }

    /// Open `path` and return the lazy frame loop without writing anything.
    pub fn frames(&self, path: &Path) -> PipelineResult<FrameStream<'_>> {
        let reader = self
            .backend
            .open_reader(path)
            .map_err(|e| PipelineError::decode(path, format!("{e:#}")))?;
        Ok(FrameStream::new(path, reader, &self.detector, &self.config))
    }

    pub fn process(&self, path: &Path) -> PipelineResult<VideoAnalysis> {
        let start = Instant::now();
        let stream = self.frames(path)?;
        let properties = stream.reader.properties();

        let artifacts = self.store.video_artifacts(path);
        let writer = self
            .backend
            .open_writer(&artifacts.intermediate, &properties)
            .map_err(|e| PipelineError::encode(&artifacts.intermediate, format!("{e:#}")))?;

        tracing::info!(
            "Processing {:?} with {} (stride {}, {}x{} @ {:.2}fps)",
            path,
            self.detector.detector_name(),
            self.config.schedule.stride(),
            properties.width,
            properties.height,
            properties.fps
        );

        let (total_frames, detections) =
            match drain_into(stream, writer, &artifacts.intermediate, properties.frame_count) {
                Ok(drained) => drained,
                Err(e) => {
                    remove_partial(&artifacts.intermediate);
                    return Err(e);
                }
            };

        if total_frames != properties.frame_count {
            tracing::warn!(
                "{:?}: container advertised {} frames but {} were decoded",
                path,
                properties.frame_count,
                total_frames
            );
        }

        let transcode = self
            .transcoder
            .transcode(&artifacts.intermediate, &artifacts.web);

        tracing::info!(
            "Finished {:?}: {} frames, {} detections in {:.2?}{}",
            path,
            total_frames,
            detections.len(),
            start.elapsed(),
            if transcode.is_fallback() {
                " (intermediate output kept)"
            } else {
                ""
            }
        );

        Ok(VideoAnalysis {
            output_video_ref: artifact_name(transcode.path()),
            total_frames,
            fps: properties.fps as u32,
            width: properties.width,
            height: properties.height,
            detections,
            transcode,
        })
    }
}

/// Write every processed frame and collect detections in frame order. The
/// writer is finished on success and dropped (released) on any error.
fn drain_into(
    mut stream: FrameStream<'_>,
    mut writer: Box<dyn VideoWriter>,
    output: &Path,
    expected_frames: usize,
) -> PipelineResult<(usize, Vec<Detection>)> {
    let pb = progress_bar(expected_frames);
    let mut detections = Vec::new();
    let mut failed = 0usize;

    for processed in stream.by_ref() {
        let processed = processed?;
        let index = processed.index;
        writer
            .write_frame(&processed.image)
            .map_err(|e| PipelineError::encode(output, format!("frame {index}: {e:#}")))?;

        match processed.outcome {
            FrameOutcome::Detected(found) => detections.extend(found),
            FrameOutcome::Failed(reason) => {
                failed += 1;
                tracing::debug!("frame {} written without detections: {}", index, reason);
            }
            FrameOutcome::Skipped => {}
        }
        pb.inc(1);
    }

    if failed > 0 {
        tracing::warn!("{} sampled frames were written without detections", failed);
    }

    writer
        .finish()
        .map_err(|e| PipelineError::encode(output, format!("{e:#}")))?;
    pb.finish_and_clear();

    Ok((stream.frames_read(), detections))
}

fn progress_bar(expected_frames: usize) -> ProgressBar {
    let pb = ProgressBar::new(expected_frames as u64);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to remove partial output {:?}: {}", path, e);
        }
    }
}
