use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

use crate::pipeline::types::Detection;

const BOX_THICKNESS: u32 = 2;
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_PADDING: u32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [52, 69, 147],
];

/// Draws detection boxes (and labels, when a font is available) onto frames.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Labels are only rendered when a TTF/OTF font is supplied.
    pub fn with_font_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read label font {}", path.display()))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|_| anyhow::anyhow!("Invalid font file: {}", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn annotate(&self, frame: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = frame.clone();
        for det in detections {
            self.draw_detection(&mut canvas, det);
        }
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, det: &Detection) {
        let Some(bbox) = det.bounding_box else {
            return;
        };
        let color = Rgb(class_color(&det.class_label));

        for t in 0..BOX_THICKNESS {
            let w = bbox.width().saturating_sub(2 * t);
            let h = bbox.height().saturating_sub(2 * t);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at((bbox.x1 + t) as i32, (bbox.y1 + t) as i32).of_size(w, h);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        let Some(font) = &self.font else {
            return;
        };

        let label = format!("{} {:.2}", det.class_label, det.confidence / 100.0);
        let scale = PxScale::from(LABEL_FONT_SIZE);
        let (text_w, text_h) = text_size(scale, font, &label);
        let label_w = (text_w + 2 * LABEL_PADDING).min(canvas.width().saturating_sub(bbox.x1));
        let label_h = text_h + 2 * LABEL_PADDING;
        if label_w == 0 {
            return;
        }

        // Above the box when there is room, inside it otherwise
        let label_y = bbox.y1.checked_sub(label_h).unwrap_or(bbox.y1);
        let background = Rect::at(bbox.x1 as i32, label_y as i32).of_size(label_w, label_h);
        draw_filled_rect_mut(canvas, background, color);
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            (bbox.x1 + LABEL_PADDING) as i32,
            (label_y + LABEL_PADDING) as i32,
            scale,
            font,
            &label,
        );
    }
}

/// Stable per-class color so the same label keeps its color across frames.
fn class_color(label: &str) -> [u8; 3] {
    let hash = label
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    PALETTE[hash % PALETTE.len()]
}
