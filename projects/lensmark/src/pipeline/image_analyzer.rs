use image::{DynamicImage, ImageFormat, ImageReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::artifacts::ArtifactStore;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::detection::FrameDetector;
use crate::pipeline::types::ImageAnalysis;

/// Single-shot analysis of a still image.
pub struct ImageAnalyzer {
    detector: FrameDetector,
    store: Arc<ArtifactStore>,
}

impl ImageAnalyzer {
    pub fn new(detector: FrameDetector, store: Arc<ArtifactStore>) -> Self {
        Self { detector, store }
    }

    pub fn analyze(&self, path: &Path) -> PipelineResult<ImageAnalysis> {
        let start = Instant::now();
        self.store.clear_reserved_image()?;

        // Format comes from the file contents, never the extension.
        let reader = ImageReader::open(path)
            .map_err(|e| PipelineError::decode(path, e))?
            .with_guessed_format()
            .map_err(|e| PipelineError::decode(path, e))?;
        let format = reader.format();
        let image = reader
            .decode()
            .map_err(|e| PipelineError::decode(path, e))?;

        let (width, height) = (image.width(), image.height());
        let rgb = image.to_rgb8();
        let detected = self.detector.detect(&rgb, None)?;
        let annotated_image_ref = self.store.save_annotated_image(&detected.annotated, path)?;

        tracing::info!(
            "Analyzed {:?} ({}x{}): {} detections in {:.2?}",
            path,
            width,
            height,
            detected.detections.len(),
            start.elapsed()
        );

        Ok(ImageAnalysis {
            dimensions: format!("{width}x{height}"),
            format: format_name(format),
            color_mode: color_mode(&image).to_string(),
            mean_channel_values: channel_means(&image),
            detections: detected.detections,
            annotated_image_ref,
        })
    }
}

fn format_name(format: Option<ImageFormat>) -> String {
    format
        .map(|f| format!("{f:?}").to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Pixel layout of the decoded buffer, using the conventional short mode names.
fn color_mode(image: &DynamicImage) -> &'static str {
    match image {
        DynamicImage::ImageLuma8(_) => "L",
        DynamicImage::ImageLumaA8(_) => "LA",
        DynamicImage::ImageRgb8(_) => "RGB",
        DynamicImage::ImageRgba8(_) => "RGBA",
        DynamicImage::ImageLuma16(_) => "L;16",
        DynamicImage::ImageLumaA16(_) => "LA;16",
        DynamicImage::ImageRgb16(_) => "RGB;16",
        DynamicImage::ImageRgba16(_) => "RGBA;16",
        DynamicImage::ImageRgb32F(_) => "RGB;F",
        DynamicImage::ImageRgba32F(_) => "RGBA;F",
        _ => "UNKNOWN",
    }
}

/// Mean of each channel over the native sample buffer.
fn channel_means(image: &DynamicImage) -> Vec<f64> {
    match image {
        DynamicImage::ImageLuma8(buf) => means(buf.as_raw(), 1),
        DynamicImage::ImageLumaA8(buf) => means(buf.as_raw(), 2),
        DynamicImage::ImageRgb8(buf) => means(buf.as_raw(), 3),
        DynamicImage::ImageRgba8(buf) => means(buf.as_raw(), 4),
        DynamicImage::ImageLuma16(buf) => means(buf.as_raw(), 1),
        DynamicImage::ImageLumaA16(buf) => means(buf.as_raw(), 2),
        DynamicImage::ImageRgb16(buf) => means(buf.as_raw(), 3),
        DynamicImage::ImageRgba16(buf) => means(buf.as_raw(), 4),
        DynamicImage::ImageRgb32F(buf) => means(buf.as_raw(), 3),
        DynamicImage::ImageRgba32F(buf) => means(buf.as_raw(), 4),
        other => means(other.to_rgb8().as_raw(), 3),
    }
}

fn means<T: Copy + Into<f64>>(samples: &[T], channels: usize) -> Vec<f64> {
    let mut sums = vec![0.0f64; channels];
    for pixel in samples.chunks_exact(channels) {
        for (sum, value) in sums.iter_mut().zip(pixel) {
            *sum += (*value).into();
        }
    }

    let count = (samples.len() / channels).max(1) as f64;
    sums.into_iter().map(|s| s / count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ImageNaming;
    use crate::pipeline::detection::tests::{frame_detector, FailingDetector, FixedDetector};
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn analyzer(
        dir: &Path,
        naming: ImageNaming,
        detector: impl crate::pipeline::detection::Detector + 'static,
    ) -> ImageAnalyzer {
        let store = ArtifactStore::open(dir.join("artifacts"), naming, 5).unwrap();
        ImageAnalyzer::new(frame_detector(detector), Arc::new(store))
    }

    #[test]
    fn test_analyze_rgb_image() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.png");
        RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]))
            .save(&input)
            .unwrap();

        let analyzer = analyzer(
            dir.path(),
            ImageNaming::Request,
            FixedDetector::single("person", 0.9123),
        );
        let result = analyzer.analyze(&input).unwrap();

        assert_eq!(result.dimensions, "64x48");
        assert_eq!(result.format, "PNG");
        assert_eq!(result.color_mode, "RGB");
        assert_eq!(result.mean_channel_values, vec![10.0, 20.0, 30.0]);
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].confidence, 91.23);
        assert_eq!(result.detections[0].frame_index, None);
        assert!(result.annotated_image_ref.starts_with("result_"));
        assert!(dir
            .path()
            .join("artifacts")
            .join(&result.annotated_image_ref)
            .exists());
    }

    #[test]
    fn test_analyze_grayscale_has_one_mean() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("gray.png");
        let mut img = GrayImage::from_pixel(4, 2, Luma([0]));
        for x in 0..4 {
            img.put_pixel(x, 0, Luma([100]));
        }
        img.save(&input).unwrap();

        let analyzer = analyzer(dir.path(), ImageNaming::Request, FixedDetector::single("x", 0.5));
        let result = analyzer.analyze(&input).unwrap();

        assert_eq!(result.color_mode, "L");
        assert_eq!(result.mean_channel_values, vec![50.0]);
    }

    #[test]
    fn test_format_detected_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let png_path = dir.path().join("real.png");
        RgbImage::new(8, 8).save(&png_path).unwrap();
        let disguised = dir.path().join("disguised.jpg");
        std::fs::copy(&png_path, &disguised).unwrap();

        let analyzer = analyzer(dir.path(), ImageNaming::Request, FixedDetector::single("x", 0.5));
        assert_eq!(analyzer.analyze(&disguised).unwrap().format, "PNG");
    }

    #[test]
    fn test_text_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        std::fs::write(&input, "definitely not pixels").unwrap();

        let analyzer = analyzer(dir.path(), ImageNaming::Request, FixedDetector::single("x", 0.5));
        let err = analyzer.analyze(&input).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), ImageNaming::Request, FixedDetector::single("x", 0.5));
        assert!(analyzer
            .analyze(&dir.path().join("gone.png"))
            .unwrap_err()
            .is_decode());
    }

    #[test]
    fn test_inference_failure_is_fatal_for_images() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.png");
        RgbImage::new(8, 8).save(&input).unwrap();

        let analyzer = analyzer(dir.path(), ImageNaming::Request, FailingDetector);
        assert!(matches!(
            analyzer.analyze(&input),
            Err(PipelineError::Inference(_))
        ));
    }

    #[test]
    fn test_reserved_naming_overwrites_single_slot() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.png");
        let second = dir.path().join("second.png");
        RgbImage::new(10, 10).save(&first).unwrap();
        RgbImage::new(20, 12).save(&second).unwrap();

        let analyzer = analyzer(dir.path(), ImageNaming::Reserved, FixedDetector::single("x", 0.5));
        assert_eq!(analyzer.analyze(&first).unwrap().annotated_image_ref, "result.jpg");
        assert_eq!(analyzer.analyze(&second).unwrap().annotated_image_ref, "result.jpg");

        let artifacts: Vec<_> = std::fs::read_dir(dir.path().join("artifacts"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        assert_eq!(artifacts.len(), 1);
        let saved = image::open(dir.path().join("artifacts").join("result.jpg")).unwrap();
        assert_eq!((saved.width(), saved.height()), (20, 12));
    }

    #[test]
    fn test_failed_analysis_empties_reserved_slot() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        let bad = dir.path().join("bad.txt");
        RgbImage::new(10, 10).save(&good).unwrap();
        std::fs::write(&bad, "not an image").unwrap();
        let slot = dir.path().join("artifacts").join("result.jpg");

        let analyzer = analyzer(dir.path(), ImageNaming::Reserved, FixedDetector::single("x", 0.5));
        analyzer.analyze(&good).unwrap();
        assert!(slot.exists());

        assert!(analyzer.analyze(&bad).unwrap_err().is_decode());
        assert!(!slot.exists());
    }

    #[test]
    fn test_inference_failure_empties_reserved_slot() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.png");
        RgbImage::new(8, 8).save(&input).unwrap();
        let slot = dir.path().join("artifacts").join("result.jpg");

        analyzer(dir.path(), ImageNaming::Reserved, FixedDetector::single("x", 0.5))
            .analyze(&input)
            .unwrap();
        assert!(slot.exists());

        let failing = analyzer(dir.path(), ImageNaming::Reserved, FailingDetector);
        assert!(failing.analyze(&input).is_err());
        assert!(!slot.exists());
    }
}
