use anyhow::{anyhow, Result};
use image::{DynamicImage, RgbImage};
use std::sync::{Arc, Mutex};
use usls::models::RTDETR;
use usls::{Config, Image};

use crate::error::PipelineError;
use crate::pipeline::annotate::Annotator;
use crate::pipeline::types::{Detection, RawDetection};

/// Opaque object detector. Implementations must be safe to share across
/// requests; any internal mutable model state has to be guarded internally.
pub trait Detector: Send + Sync {
    /// Run detection on one RGB frame. Boxes are in pixel coordinates of `frame`.
    fn detect(&self, frame: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Detector name (for logging)
    fn name(&self) -> &str;
}

/// A wrapper around the USLS RT-DETR model that corrects for aspect-ratio
/// padding bugs in the underlying model library.
pub struct RtDetrDetector {
    model: Mutex<RTDETR>,
}

impl RtDetrDetector {
    /// Load the model once at startup. Failure here is fatal for the service.
    pub fn load(model_path: &str) -> Result<Self, PipelineError> {
        let config = Config::default()
            .with_model_file(model_path)
            .with_class_names(&usls::NAMES_COCO_80);

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config
            .commit()
            .map_err(|e| PipelineError::Startup(format!("{model_path}: {e}")))?;
        let model =
            RTDETR::new(config).map_err(|e| PipelineError::Startup(format!("{model_path}: {e}")))?;

        tracing::info!("RtDetrDetector: loaded model from {}", model_path);
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Detector for RtDetrDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<RawDetection>> {
        let img_w = frame.width() as f32;
        let img_h = frame.height() as f32;

        // RT-DETR in usls scales boxes by the short side; undo it on the long one.
        let (x_corr, y_corr) = if img_w > img_h {
            (img_w / img_h, 1.0)
        } else if img_h > img_w {
            (1.0, img_h / img_w)
        } else {
            (1.0, 1.0)
        };

        let input = [Image::from(DynamicImage::ImageRgb8(frame.clone()))];
        let results = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| anyhow!("Detector mutex poisoned"))?;
            model.forward(&input)?
        };

        let detections = results
            .into_iter()
            .next()
            .map(|y| y.hbbs)
            .unwrap_or_default()
            .into_iter()
            .map(|hbb| {
                let xmin = hbb.xmin() * x_corr;
                let ymin = hbb.ymin() * y_corr;
                RawDetection {
                    class_name: hbb
                        .name()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("class_{}", hbb.id().unwrap_or(0))),
                    score: hbb.confidence().unwrap_or(0.0),
                    xmin,
                    ymin,
                    xmax: xmin + hbb.width() * x_corr,
                    ymax: ymin + hbb.height() * y_corr,
                }
            })
            .collect();

        Ok(detections)
    }

    fn name(&self) -> &str {
        "RT-DETR"
    }
}

/// Normalized detections for one frame plus the frame with boxes drawn on it.
pub struct DetectedFrame {
    pub detections: Vec<Detection>,
    pub annotated: RgbImage,
}

/// Detector adapter used by both the image and video paths: runs the shared
/// detector, normalizes its output and renders the annotated frame.
#[derive(Clone)]
pub struct FrameDetector {
    detector: Arc<dyn Detector>,
    annotator: Arc<Annotator>,
    min_confidence: f32,
}

impl FrameDetector {
    pub fn new(
        detector: Arc<dyn Detector>,
        annotator: Arc<Annotator>,
        min_confidence: f32,
    ) -> Self {
        Self {
            detector,
            annotator,
            min_confidence,
        }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn detect(
        &self,
        frame: &RgbImage,
        frame_index: Option<usize>,
    ) -> Result<DetectedFrame, PipelineError> {
        let raw = self
            .detector
            .detect(frame)
            .map_err(|e| PipelineError::Inference(format!("{e:#}")))?;

        let (width, height) = frame.dimensions();
        let detections: Vec<Detection> = raw
            .iter()
            .filter(|d| d.score >= self.min_confidence)
            .filter_map(|d| Detection::from_raw(d, width, height, frame_index))
            .collect();

        if let Some(index) = frame_index {
            tracing::debug!("frame {}: {} detections", index, detections.len());
        }

        let annotated = self.annotator.annotate(frame, &detections);
        Ok(DetectedFrame {
            detections,
            annotated,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic detector that reports the same boxes for every frame.
    pub(crate) struct FixedDetector {
        pub detections: Vec<RawDetection>,
    }

    impl FixedDetector {
        pub(crate) fn single(class_name: &str, score: f32) -> Self {
            Self {
                detections: vec![RawDetection {
                    class_name: class_name.to_string(),
                    score,
                    xmin: 4.0,
                    ymin: 4.0,
                    xmax: 20.0,
                    ymax: 16.0,
                }],
            }
        }
    }

    impl Detector for FixedDetector {
        fn detect(&self, _frame: &RgbImage) -> Result<Vec<RawDetection>> {
            Ok(self.detections.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    pub(crate) struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&self, _frame: &RgbImage) -> Result<Vec<RawDetection>> {
            Err(anyhow!("model exploded"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    pub(crate) fn frame_detector(detector: impl Detector + 'static) -> FrameDetector {
        FrameDetector::new(Arc::new(detector), Arc::new(Annotator::default()), 0.25)
    }

    #[test]
    fn test_detect_filters_and_normalizes() {
        let detector = FixedDetector {
            detections: vec![
                RawDetection {
                    class_name: "person".to_string(),
                    score: 0.91234,
                    xmin: 1.6,
                    ymin: 2.2,
                    xmax: 50.0,
                    ymax: 60.0,
                },
                // Below min confidence
                RawDetection {
                    class_name: "cat".to_string(),
                    score: 0.1,
                    xmin: 0.0,
                    ymin: 0.0,
                    xmax: 10.0,
                    ymax: 10.0,
                },
                // Degenerate after clamping to the 32x32 frame
                RawDetection {
                    class_name: "car".to_string(),
                    score: 0.9,
                    xmin: 40.0,
                    ymin: 40.0,
                    xmax: 50.0,
                    ymax: 50.0,
                },
            ],
        };

        let frame = RgbImage::new(32, 32);
        let result = frame_detector(detector).detect(&frame, Some(3)).unwrap();

        assert_eq!(result.detections.len(), 1);
        let det = &result.detections[0];
        assert_eq!(det.class_label, "person");
        assert_eq!(det.confidence, 91.23);
        assert_eq!(det.frame_index, Some(3));
        let bbox = det.bounding_box.unwrap();
        assert_eq!((bbox.x1, bbox.y1, bbox.x2, bbox.y2), (2, 2, 32, 32));
        assert_eq!(result.annotated.dimensions(), (32, 32));
    }

    #[test]
    fn test_detect_invariants_hold() {
        let detector = FixedDetector {
            detections: (0..20)
                .map(|i| RawDetection {
                    class_name: format!("c{}", i),
                    score: i as f32 / 19.0,
                    xmin: -10.0 + i as f32 * 5.0,
                    ymin: -3.0 * i as f32,
                    xmax: 30.0 + i as f32 * 7.0,
                    ymax: 200.0,
                })
                .collect(),
        };

        let frame = RgbImage::new(64, 48);
        let result = frame_detector(detector).detect(&frame, None).unwrap();
        assert!(!result.detections.is_empty());
        for det in &result.detections {
            assert!((0.0..=100.0).contains(&det.confidence));
            let b = det.bounding_box.unwrap();
            assert!(b.x1 < b.x2 && b.x2 <= 64);
            assert!(b.y1 < b.y2 && b.y2 <= 48);
        }
    }

    #[test]
    fn test_detect_failure_is_inference_error() {
        let frame = RgbImage::new(8, 8);
        let err = frame_detector(FailingDetector)
            .detect(&frame, None)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Inference(_)));
    }
}
