use super::convert::rgb_to_mat;
use super::{VideoProperties, VideoWriter};
use anyhow::{anyhow, Result};
use image::RgbImage;
use opencv::{core::Size, prelude::*, videoio};
use std::path::Path;

pub struct OpencvWriter {
    writer: videoio::VideoWriter,
    width: u32,
    height: u32,
    released: bool,
}

impl OpencvWriter {
    pub fn create(path: &Path, fourcc: [char; 4], properties: &VideoProperties) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Output path is not valid UTF-8: {:?}", path))?;

        if properties.width == 0 || properties.height == 0 {
            return Err(anyhow!(
                "Cannot create a {}x{} video",
                properties.width,
                properties.height
            ));
        }

        let code = videoio::VideoWriter::fourcc(fourcc[0], fourcc[1], fourcc[2], fourcc[3])?;
        let size = Size::new(properties.width as i32, properties.height as i32);
        let writer = videoio::VideoWriter::new(path_str, code, properties.fps, size, true)?;
        if !writer.is_opened()? {
            return Err(anyhow!(
                "VideoWriter refused {} with codec {}",
                path_str,
                fourcc.iter().collect::<String>()
            ));
        }

        tracing::info!(
            "OpencvWriter: writing {} ({}x{} @ {:.2}fps, {})",
            path_str,
            properties.width,
            properties.height,
            properties.fps,
            fourcc.iter().collect::<String>()
        );

        Ok(Self {
            writer,
            width: properties.width,
            height: properties.height,
            released: false,
        })
    }
}

impl VideoWriter for OpencvWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "Frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }

        let mat = rgb_to_mat(frame)?;
        self.writer.write(&mat)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.released = true;
        self.writer.release()?;
        Ok(())
    }
}

impl Drop for OpencvWriter {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.writer.release() {
            tracing::warn!("OpencvWriter: failed to release writer: {}", e);
        }
    }
}
