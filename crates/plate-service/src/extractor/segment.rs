//! Text-run finding inside a plate crop.
//!
//! Ink components of character size are grouped left to right into runs that
//! share a baseline band; each run is one recognizer input.

use crate::normalizer::to_ocr_preprocessed;
use common::plates::BoundingBox;
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};

const MIN_CHAR_HEIGHT_RATIO: f32 = 0.25;
const MAX_CHAR_HEIGHT_RATIO: f32 = 0.95;
const MAX_CHAR_ASPECT: f32 = 1.5;
const MIN_CHAR_PIXELS: u32 = 8;
const MIN_VERTICAL_OVERLAP: f32 = 0.5;
const RUN_PADDING: u32 = 2;

#[derive(Debug, Clone, Copy)]
struct Component {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u32,
}

impl Component {
    fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Regions of the crop that look like lines of characters, in reading order
pub fn find_text_runs(crop: &RgbImage) -> Vec<BoundingBox> {
    let binary = to_ocr_preprocessed(crop);
    find_runs_in_binary(&binary)
}

/// Same as [`find_text_runs`] over an already binarised image (ink = 0)
pub fn find_runs_in_binary(binary: &GrayImage) -> Vec<BoundingBox> {
    let (width, height) = binary.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let ink = GrayImage::from_fn(width, height, |x, y| {
        if binary.get_pixel(x, y)[0] == 0 {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let labels = connected_components(&ink, Connectivity::Eight, Luma([0u8]));

    let mut components: Vec<Option<Component>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if components.len() <= label {
            components.resize(label + 1, None);
        }
        let entry = components[label].get_or_insert(Component {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            pixels: 0,
        });
        entry.min_x = entry.min_x.min(x);
        entry.min_y = entry.min_y.min(y);
        entry.max_x = entry.max_x.max(x);
        entry.max_y = entry.max_y.max(y);
        entry.pixels += 1;
    }

    let min_h = (height as f32 * MIN_CHAR_HEIGHT_RATIO).ceil() as u32;
    let max_h = (height as f32 * MAX_CHAR_HEIGHT_RATIO).floor() as u32;

    let mut chars: Vec<Component> = components
        .into_iter()
        .flatten()
        .filter(|c| {
            c.pixels >= MIN_CHAR_PIXELS
                && (min_h..=max_h).contains(&c.height())
                && c.width() as f32 <= c.height() as f32 * MAX_CHAR_ASPECT
        })
        .collect();
    chars.sort_by_key(|c| (c.min_x, c.min_y));

    let mut runs: Vec<Component> = Vec::new();
    for ch in chars {
        let joined = runs.iter_mut().rev().find(|run| continues_run(run, &ch));
        match joined {
            Some(run) => {
                run.min_x = run.min_x.min(ch.min_x);
                run.min_y = run.min_y.min(ch.min_y);
                run.max_x = run.max_x.max(ch.max_x);
                run.max_y = run.max_y.max(ch.max_y);
                run.pixels += ch.pixels;
            }
            None => runs.push(ch),
        }
    }

    let mut boxes: Vec<BoundingBox> = runs
        .iter()
        .map(|run| {
            BoundingBox::new(run.min_x, run.min_y, run.width(), run.height())
                .expand(RUN_PADDING, width, height)
        })
        .collect();
    boxes.sort_by_key(|b| (b.y / (b.height / 2).max(1), b.x));

    boxes
}

fn continues_run(run: &Component, ch: &Component) -> bool {
    let top = run.min_y.max(ch.min_y);
    let bottom = run.max_y.min(ch.max_y);
    if bottom < top {
        return false;
    }
    let overlap = (bottom - top + 1) as f32;
    let shorter = run.height().min(ch.height()) as f32;
    if overlap < shorter * MIN_VERTICAL_OVERLAP {
        return false;
    }

    let gap = ch.min_x.saturating_sub(run.max_x + 1);
    gap <= run.height().max(ch.height())
}
