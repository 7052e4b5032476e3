//! Plate localization
//!
//! Two independent detectors run in a fixed order: the pre-trained classifier
//! first, the contour heuristic only when the classifier finds nothing. The
//! largest region wins and is cropped with a small margin.
pub mod cascade;
pub mod geometry;
pub mod overlay;

pub use cascade::{CascadeParams, HaarCascade};
pub use geometry::detect_by_geometry;
pub use overlay::draw_overlay;

use common::plates::BoundingBox;
use image::{GrayImage, RgbImage};
use std::sync::Arc;

/// Pixels added on each side of the chosen region before cropping
pub const CROP_MARGIN: u32 = 5;

/// Object detector over single-channel images
pub trait PlateClassifier: Send + Sync {
    /// Candidate plate regions in image coordinates, possibly empty
    fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox>;
}

/// Which detector produced the chosen region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    Classifier,
    Geometry,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Classifier => "classifier",
            DetectionSource::Geometry => "geometry",
        }
    }
}

/// Best region of one image, cropped
#[derive(Debug, Clone)]
pub struct PlateCrop {
    /// Pixels of the region plus the margin
    pub image: RgbImage,
    /// Region as reported by the detector, without the margin
    pub bounding_box: BoundingBox,
    pub source: DetectionSource,
}

/// Run the classifier on the grayscale image; boxes are clipped to the image
pub fn detect_by_classifier(classifier: &dyn PlateClassifier, image: &RgbImage) -> Vec<BoundingBox> {
    let gray = image::imageops::grayscale(image);
    let (width, height) = gray.dimensions();

    classifier
        .detect(&gray)
        .into_iter()
        .filter_map(|b| b.clamp_to(width, height))
        .collect()
}

/// Largest box by area; the earliest one wins ties
pub fn select_largest(boxes: &[BoundingBox]) -> Option<BoundingBox> {
    boxes.iter().fold(None, |best: Option<BoundingBox>, b| match best {
        Some(current) if current.area() >= b.area() => Some(current),
        _ => Some(*b),
    })
}

/// Copy of `bounding_box` grown by `margin` on each side, clamped to the image
pub fn crop_with_margin(image: &RgbImage, bounding_box: &BoundingBox, margin: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let region = bounding_box.expand(margin, width, height);
    image::imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image()
}

/// Ordered classifier → geometry detection over normalized images
#[derive(Clone)]
pub struct PlateLocalizer {
    classifier: Arc<dyn PlateClassifier>,
}

impl PlateLocalizer {
    pub fn new(classifier: Arc<dyn PlateClassifier>) -> Self {
        Self { classifier }
    }

    /// All candidate regions from the first detector that finds any
    pub fn localize(&self, image: &RgbImage) -> Option<(Vec<BoundingBox>, DetectionSource)> {
        let boxes = detect_by_classifier(self.classifier.as_ref(), image);
        if !boxes.is_empty() {
            return Some((boxes, DetectionSource::Classifier));
        }

        tracing::debug!("classifier found no plate, trying contour geometry");

        let boxes = detect_by_geometry(image);
        if !boxes.is_empty() {
            return Some((boxes, DetectionSource::Geometry));
        }

        None
    }

    /// Largest candidate region, cropped with [`CROP_MARGIN`]
    pub fn get_best_plate(&self, image: &RgbImage) -> Option<PlateCrop> {
        let (boxes, source) = self.localize(image)?;
        let bounding_box = select_largest(&boxes)?;

        tracing::debug!(
            source = source.as_str(),
            candidates = boxes.len(),
            x = bounding_box.x,
            y = bounding_box.y,
            width = bounding_box.width,
            height = bounding_box.height,
            "selected plate region"
        );

        Some(PlateCrop {
            image: crop_with_margin(image, &bounding_box, CROP_MARGIN),
            bounding_box,
            source,
        })
    }
}
