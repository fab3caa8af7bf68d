use anyhow::{anyhow, Result};
use image::RgbImage;
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;

/// Convert an OpenCV Mat (BGR) to an RGB image buffer.
pub fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
    let mut rgb_mat = Mat::default();
    imgproc::cvt_color_def(mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))
}

/// Convert an RGB image buffer into a BGR Mat suitable for `VideoWriter`.
pub fn rgb_to_mat(image: &RgbImage) -> Result<Mat> {
    let flat = Mat::from_slice(image.as_raw())?;
    let rgb = flat.reshape(3, image.height() as i32)?.try_clone()?;

    let mut bgr = Mat::default();
    imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)?;
    Ok(bgr)
}
