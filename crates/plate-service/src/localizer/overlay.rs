//! Preview rendering: plate boxes and their label drawn over a copy of the image.

use ab_glyph::{FontArc, FontRef, FontVec, PxScale};
use anyhow::{Context, Result};
use common::plates::BoundingBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

pub const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const LABEL_TEXT: &str = "License Plate";

const BOX_THICKNESS: u32 = 3;
const LABEL_HEIGHT: u32 = 22;
const LABEL_GAP: u32 = 2;
const LABEL_SCALE: f32 = 18.0;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// DejaVu Sans Bold, see `assets/DejaVuSans-LICENSE.txt`
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans-Bold.ttf");

/// Label font bundled with the service
pub fn default_font() -> Result<FontArc> {
    let font = FontRef::try_from_slice(EMBEDDED_FONT)
        .map_err(|e| anyhow::anyhow!("Invalid embedded overlay font: {}", e))?;
    Ok(FontArc::new(font))
}

/// Load a TrueType/OpenType font for the label text
pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read overlay font {}", path.display()))?;
    let font = FontVec::try_from_vec(bytes)
        .map_err(|e| anyhow::anyhow!("Invalid overlay font {}: {}", path.display(), e))?;
    Ok(FontArc::new(font))
}

/// New image with each box outlined and labelled; the input is left untouched.
///
/// Without a font the label is drawn as an empty tab.
pub fn draw_overlay(image: &RgbImage, boxes: &[BoundingBox], font: Option<&FontArc>) -> RgbImage {
    let mut canvas = image.clone();
    let (width, height) = canvas.dimensions();

    for bbox in boxes {
        let Some(bbox) = bbox.clamp_to(width, height) else {
            continue;
        };

        for inset in 0..BOX_THICKNESS {
            let w = bbox.width.saturating_sub(2 * inset);
            let h = bbox.height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut canvas, rect, OVERLAY_COLOR);
        }

        draw_label(&mut canvas, &bbox, font);
    }

    canvas
}

fn draw_label(canvas: &mut RgbImage, bbox: &BoundingBox, font: Option<&FontArc>) {
    let scale = PxScale::from(LABEL_SCALE);
    let label_width = match font {
        Some(font) => text_size(scale, font, LABEL_TEXT).0 + 8,
        None => bbox.width,
    }
    .clamp(1, canvas.width().saturating_sub(bbox.x).max(1));

    let top = bbox.y.saturating_sub(LABEL_HEIGHT + LABEL_GAP);
    let tab = Rect::at(bbox.x as i32, top as i32).of_size(label_width, LABEL_HEIGHT);
    draw_filled_rect_mut(canvas, tab, OVERLAY_COLOR);

    if let Some(font) = font {
        draw_text_mut(
            canvas,
            LABEL_TEXT_COLOR,
            bbox.x as i32 + 4,
            top as i32 + 2,
            scale,
            font,
            LABEL_TEXT,
        );
    }
}
