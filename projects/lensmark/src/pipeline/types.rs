use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::pipeline::transcode::TranscodeOutcome;

/// Extensions routed to the video pipeline; anything else is treated as an image.
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let is_video = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| {
                VIDEO_EXTENSIONS
                    .iter()
                    .any(|candidate| ext.eq_ignore_ascii_case(candidate))
            })
            .unwrap_or(false);

        if is_video {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// What to do when the detector fails on a sampled video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InferencePolicy {
    /// Write the frame unannotated and keep going.
    #[default]
    Skip,
    /// Fail the whole request on the first failure.
    Abort,
}

/// Decides which frame indices go through the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSchedule {
    stride: usize,
}

impl SampleSchedule {
    pub const DEFAULT_STRIDE: usize = 3;

    /// A stride of zero is treated as one (every frame).
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_sampled(&self, frame_index: usize) -> bool {
        frame_index % self.stride == 0
    }
}

impl Default for SampleSchedule {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STRIDE)
    }
}

/// Knobs shared by the image and video paths.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub schedule: SampleSchedule,
    pub min_confidence: f32,
    pub inference_policy: InferencePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schedule: SampleSchedule::default(),
            min_confidence: 0.25,
            inference_policy: InferencePolicy::Skip,
        }
    }
}

/// A detection as reported by the model, in pixel coordinates of the frame it
/// was run on and with a score in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_name: String,
    pub score: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Integer pixel box, `x1 < x2` and `y1 < y2`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelBox {
    /// Rounds to the nearest pixel and clamps into `[0, width] x [0, height]`.
    /// Returns `None` when the clamped box has no area.
    pub fn from_corners(
        xmin: f32,
        ymin: f32,
        xmax: f32,
        ymax: f32,
        width: u32,
        height: u32,
    ) -> Option<Self> {
        let clamp = |v: f32, limit: u32| -> u32 {
            if !v.is_finite() {
                return 0;
            }
            v.round().clamp(0.0, limit as f32) as u32
        };

        let (x1, x2) = (clamp(xmin.min(xmax), width), clamp(xmin.max(xmax), width));
        let (y1, y2) = (clamp(ymin.min(ymax), height), clamp(ymin.max(ymax), height));

        if x1 >= x2 || y1 >= y2 {
            return None;
        }
        Some(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// One detected object instance.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Detection {
    #[serde(rename = "frame", skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<usize>,
    #[serde(rename = "class")]
    pub class_label: String,
    /// Percentage, rounded to two decimals.
    pub confidence: f64,
    #[serde(rename = "bbox", skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<PixelBox>,
}

impl Detection {
    pub fn from_raw(
        raw: &RawDetection,
        width: u32,
        height: u32,
        frame_index: Option<usize>,
    ) -> Option<Self> {
        let bounding_box =
            PixelBox::from_corners(raw.xmin, raw.ymin, raw.xmax, raw.ymax, width, height)?;

        Some(Self {
            frame_index,
            class_label: raw.class_name.clone(),
            confidence: confidence_percent(raw.score),
            bounding_box: Some(bounding_box),
        })
    }
}

/// Converts a [0, 1] score into a percentage with two decimals.
pub fn confidence_percent(score: f32) -> f64 {
    let pct = (f64::from(score) * 100.0).clamp(0.0, 100.0);
    (pct * 100.0).round() / 100.0
}

#[derive(Serialize, Debug, Clone)]
pub struct ImageAnalysis {
    pub dimensions: String,
    pub format: String,
    #[serde(rename = "mode")]
    pub color_mode: String,
    #[serde(rename = "mean_values")]
    pub mean_channel_values: Vec<f64>,
    pub detections: Vec<Detection>,
    #[serde(rename = "result_image")]
    pub annotated_image_ref: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct VideoAnalysis {
    #[serde(rename = "output_video")]
    pub output_video_ref: String,
    pub total_frames: usize,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    #[serde(skip)]
    pub transcode: TranscodeOutcome,
}

#[derive(Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum Analysis {
    Image(ImageAnalysis),
    Video(VideoAnalysis),
}

impl Analysis {
    pub fn kind(&self) -> MediaKind {
        match self {
            Analysis::Image(_) => MediaKind::Image,
            Analysis::Video(_) => MediaKind::Video,
        }
    }
}

/// Paths of the two artifacts a video run can produce.
#[derive(Debug, Clone)]
pub struct VideoArtifacts {
    pub intermediate: PathBuf,
    pub web: PathBuf,
}
