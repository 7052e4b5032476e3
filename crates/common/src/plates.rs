//! Plate recognition contracts for the Plate Reader service.
//!
//! This module defines the values that flow out of the recognition core and
//! the JSON envelope the HTTP layer renders them into.

use serde::{Deserialize, Serialize};

/// Bounding box coordinates in source-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box area in pixels (width × height)
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Clip the box so it lies fully inside an image of the given size.
    ///
    /// Returns `None` when nothing of the box remains.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Self> {
        let x1 = self.x.min(image_width);
        let y1 = self.y.min(image_height);
        let x2 = self.right().min(image_width);
        let y2 = self.bottom().min(image_height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(Self::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// Grow the box by `margin` pixels on every side, clamped to the image bounds
    pub fn expand(&self, margin: u32, image_width: u32, image_height: u32) -> Self {
        let x1 = self.x.saturating_sub(margin);
        let y1 = self.y.saturating_sub(margin);
        let x2 = self.right().saturating_add(margin).min(image_width);
        let y2 = self.bottom().saturating_add(margin).min(image_height);

        Self::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
    }
}

/// One transcription emitted by the recognition engine for one text run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCandidate {
    /// Raw text as returned by the engine
    pub text: String,

    /// Engine confidence (0.0 to 1.0)
    pub confidence: f32,
}

impl TextCandidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Terminal classification of one recognition run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateOutcome {
    /// Neither detector produced a candidate region
    NoPlateFound,

    /// A region was found but no text could be selected from it
    PlateFoundNoText,

    /// A region was found and a plate string was selected
    Success,
}

impl PlateOutcome {
    /// Human-readable message used in the response envelope
    pub fn message(&self) -> &'static str {
        match self {
            PlateOutcome::NoPlateFound => "No license plate detected in the image",
            PlateOutcome::PlateFoundNoText => {
                "License plate detected but no text could be extracted"
            }
            PlateOutcome::Success => "License plate successfully detected and extracted",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlateOutcome::NoPlateFound => "no_plate_found",
            PlateOutcome::PlateFoundNoText => "plate_found_no_text",
            PlateOutcome::Success => "success",
        }
    }
}

/// Result of one pass through the recognition pipeline.
///
/// Built through the per-outcome constructors so that, for example, a
/// `Success` always carries a box and a plate string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateResult {
    pub outcome: PlateOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate_text: Option<String>,

    pub confidence: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,

    /// Display copy of the input, with the overlay drawn when a plate was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,

    /// Display copy of the cropped plate region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate_image: Option<String>,
}

impl PlateResult {
    pub fn no_plate_found(original_image: String) -> Self {
        Self {
            outcome: PlateOutcome::NoPlateFound,
            plate_text: None,
            confidence: 0.0,
            bounding_box: None,
            original_image: Some(original_image),
            plate_image: None,
        }
    }

    pub fn plate_found_no_text(
        bounding_box: BoundingBox,
        original_image: String,
        plate_image: String,
    ) -> Self {
        Self {
            outcome: PlateOutcome::PlateFoundNoText,
            plate_text: None,
            confidence: 0.0,
            bounding_box: Some(bounding_box),
            original_image: Some(original_image),
            plate_image: Some(plate_image),
        }
    }

    pub fn success(
        plate_text: String,
        confidence: f32,
        bounding_box: BoundingBox,
        original_image: String,
        plate_image: String,
    ) -> Self {
        Self {
            outcome: PlateOutcome::Success,
            plate_text: Some(plate_text),
            confidence,
            bounding_box: Some(bounding_box),
            original_image: Some(original_image),
            plate_image: Some(plate_image),
        }
    }
}

/// JSON envelope returned by the upload endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub plate_text: Option<String>,
    pub confidence: f32,
    pub original_image: Option<String>,
    pub plate_image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl From<PlateResult> for UploadResponse {
    fn from(result: PlateResult) -> Self {
        let bounding_box = match result.outcome {
            PlateOutcome::Success => result.bounding_box,
            _ => None,
        };

        Self {
            success: result.outcome == PlateOutcome::Success,
            message: result.outcome.message().to_string(),
            plate_text: result.plate_text,
            confidence: result.confidence,
            original_image: result.original_image,
            plate_image: result.plate_image,
            bounding_box,
        }
    }
}

/// Service capabilities advertised on `/api/info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiInfo {
    pub name: String,
    pub version: String,
    pub features: Vec<String>,
    pub supported_formats: Vec<String>,
    pub max_file_size: String,
}
