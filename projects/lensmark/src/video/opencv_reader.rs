use super::convert::mat_to_rgb;
use super::{VideoProperties, VideoReader};
use anyhow::{anyhow, Result};
use image::RgbImage;
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH,
    },
};
use std::path::Path;

const FALLBACK_FPS: f64 = 30.0;

pub struct OpencvReader {
    capture: VideoCapture,
    properties: VideoProperties,
}

impl OpencvReader {
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Video path is not valid UTF-8: {:?}", path))?;

        let capture = VideoCapture::from_file(path_str, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(anyhow!("Failed to open video file: {}", path_str));
        }

        let mut fps = capture.get(CAP_PROP_FPS)?;
        if !fps.is_finite() || fps <= 0.0 {
            tracing::warn!(
                "OpencvReader: Failed to get FPS from metadata, falling back to {:.1}",
                FALLBACK_FPS
            );
            fps = FALLBACK_FPS;
        }

        let properties = VideoProperties {
            width: capture.get(CAP_PROP_FRAME_WIDTH)?.max(0.0) as u32,
            height: capture.get(CAP_PROP_FRAME_HEIGHT)?.max(0.0) as u32,
            fps,
            frame_count: capture.get(CAP_PROP_FRAME_COUNT)?.max(0.0) as usize,
        };

        tracing::info!(
            "OpencvReader: opened {}, {}x{}, fps={:.2}, stream_frames={}",
            path_str,
            properties.width,
            properties.height,
            properties.fps,
            properties.frame_count
        );

        Ok(Self {
            capture,
            properties,
        })
    }
}

impl VideoReader for OpencvReader {
    fn properties(&self) -> VideoProperties {
        self.properties
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            return Ok(None);
        }

        Ok(Some(mat_to_rgb(&frame)?))
    }
}

impl Drop for OpencvReader {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("OpencvReader: failed to release capture: {}", e);
        }
    }
}
