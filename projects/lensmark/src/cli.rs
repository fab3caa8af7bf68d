use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::artifacts::ImageNaming;
use crate::pipeline::types::{InferencePolicy, PipelineConfig, SampleSchedule};
use crate::video::parse_fourcc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to bind to
    #[arg(long, env = "LENSMARK_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to (the next free port is used if taken)
    #[arg(long, env = "LENSMARK_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Directory for uploads and generated artifacts
    #[arg(long, env = "LENSMARK_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Path to the RT-DETR ONNX model
    #[arg(long, env = "LENSMARK_MODEL_PATH")]
    pub model_path: String,

    /// Detections scoring below this are dropped
    #[arg(long, env = "LENSMARK_MIN_CONFIDENCE", default_value_t = 0.25, value_parser = parse_confidence)]
    pub min_confidence: f32,

    /// Run detection on every Nth video frame
    #[arg(long, env = "LENSMARK_STRIDE", default_value_t = SampleSchedule::DEFAULT_STRIDE, value_parser = parse_stride)]
    pub stride: usize,

    /// What to do when detection fails on a sampled video frame
    #[arg(long, env = "LENSMARK_INFERENCE_POLICY", value_enum, default_value_t = InferencePolicy::Skip)]
    pub inference_policy: InferencePolicy,

    /// Codec of the intermediate video written before transcoding
    #[arg(long, env = "LENSMARK_FOURCC", default_value = "mp4v", value_parser = parse_fourcc)]
    pub fourcc: [char; 4],

    /// ffmpeg binary used for the web-playable re-encode
    #[arg(long, env = "LENSMARK_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Skip the re-encode and serve the intermediate video
    #[arg(long, env = "LENSMARK_NO_TRANSCODE")]
    pub no_transcode: bool,

    /// Naming of annotated still images
    #[arg(long, env = "LENSMARK_IMAGE_NAMING", value_enum, default_value_t = ImageNaming::Request)]
    pub image_naming: ImageNaming,

    /// Number of request-named annotated images to keep
    #[arg(long, env = "LENSMARK_RETAIN_IMAGES", default_value_t = 20)]
    pub retain_images: usize,

    /// Maximum upload size in MiB
    #[arg(long, env = "LENSMARK_MAX_UPLOAD_MB", default_value_t = 100)]
    pub max_upload_mb: usize,

    /// TTF/OTF font for box labels; boxes are drawn without labels if unset
    #[arg(long, env = "LENSMARK_LABEL_FONT")]
    pub label_font: Option<PathBuf>,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            schedule: SampleSchedule::new(self.stride),
            min_confidence: self.min_confidence,
            inference_policy: self.inference_policy,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_stride(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("stride must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_confidence(value: &str) -> Result<f32, String> {
    let conf: f32 = value.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&conf) {
        Ok(conf)
    } else {
        Err(format!("confidence must be within [0, 1], got {conf}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["lensmark", "--model-path", "rtdetr.onnx"]).unwrap();
        assert_eq!(args.stride, 3);
        assert_eq!(args.min_confidence, 0.25);
        assert_eq!(args.fourcc, ['m', 'p', '4', 'v']);
        assert_eq!(args.image_naming, ImageNaming::Request);
        assert_eq!(args.inference_policy, InferencePolicy::Skip);
        assert_eq!(args.retain_images, 20);
        assert_eq!(args.max_upload_bytes(), 100 * 1024 * 1024);
        assert!(!args.no_transcode);
        assert!(args.label_font.is_none());

        let config = args.pipeline_config();
        assert_eq!(config.schedule.stride(), 3);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "lensmark",
            "--model-path",
            "m.onnx",
            "--stride",
            "5",
            "--inference-policy",
            "abort",
            "--image-naming",
            "reserved",
            "--fourcc",
            "MJPG",
            "--no-transcode",
        ])
        .unwrap();

        assert_eq!(args.stride, 5);
        assert_eq!(args.inference_policy, InferencePolicy::Abort);
        assert_eq!(args.image_naming, ImageNaming::Reserved);
        assert_eq!(args.fourcc, ['M', 'J', 'P', 'G']);
        assert!(args.no_transcode);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let base = ["lensmark", "--model-path", "m.onnx"];
        for bad in [
            vec!["--stride", "0"],
            vec!["--min-confidence", "1.5"],
            vec!["--fourcc", "h264x"],
            vec!["--inference-policy", "retry"],
        ] {
            let argv: Vec<&str> = base.iter().copied().chain(bad.iter().copied()).collect();
            assert!(Args::try_parse_from(argv).is_err(), "{:?} accepted", bad);
        }
    }
}
