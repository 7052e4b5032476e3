//! Upload validation, decoding and the image transforms shared by the
//! localizer and the recognizer.

use crate::error::{DecodeError, ValidationError};
use crate::filters;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, GrayImage, ImageFormat, ImageReader, RgbImage};
use std::borrow::Cow;
use std::io::Cursor;

/// Declared MIME types accepted on upload
pub const SUPPORTED_FORMATS: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Maximum upload size (10MB)
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Larger side of the working image after normalization
pub const MAX_DIMENSION: u32 = 1920;

/// JPEG quality of the preview images returned to the client
pub const DISPLAY_JPEG_QUALITY: u8 = 90;

const DISPLAY_PREFIX: &str = "data:image/jpeg;base64,";

const BILATERAL_DIAMETER: u32 = 11;
const BILATERAL_SIGMA: f32 = 17.0;
const THRESHOLD_BLOCK_SIZE: u32 = 11;
const THRESHOLD_OFFSET: i32 = 2;

/// Validates and decodes uploads into working images
#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    max_file_size: usize,
    max_dimension: u32,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(MAX_FILE_SIZE, MAX_DIMENSION)
    }
}

impl ImageNormalizer {
    pub fn new(max_file_size: usize, max_dimension: u32) -> Self {
        Self {
            max_file_size,
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Check size, declared MIME type and codec well-formedness, in that order.
    ///
    /// Only the image header is parsed here; a body that is corrupt past the
    /// header surfaces later as a [`DecodeError`].
    pub fn validate(&self, bytes: &[u8], declared_mime: &str) -> Result<(), ValidationError> {
        if bytes.len() > self.max_file_size {
            return Err(ValidationError::TooLarge {
                size: bytes.len(),
                limit: self.max_file_size,
            });
        }

        if !SUPPORTED_FORMATS.contains(&declared_mime) {
            return Err(ValidationError::UnsupportedFormat {
                declared: declared_mime.to_string(),
                supported: SUPPORTED_FORMATS.join(", "),
            });
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ValidationError::InvalidImage(e.to_string()))?;

        match reader.format() {
            Some(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) => {}
            Some(other) => {
                return Err(ValidationError::InvalidImage(format!(
                    "{:?} data is not a supported codec",
                    other
                )))
            }
            None => {
                return Err(ValidationError::InvalidImage(
                    "cannot identify image data".to_string(),
                ))
            }
        }

        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ValidationError::InvalidImage(e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(ValidationError::InvalidImage(
                "image has zero width or height".to_string(),
            ));
        }

        Ok(())
    }

    /// Decode bytes into an 8-bit RGB grid
    pub fn decode(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
        let image = image::load_from_memory(bytes)?.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(DecodeError::Empty);
        }
        Ok(image)
    }

    /// Shrink the image so its larger side is at most the configured maximum.
    ///
    /// Images already within bounds are returned borrowed.
    pub fn resize_if_oversized<'a>(&self, image: &'a RgbImage) -> Cow<'a, RgbImage> {
        resize_to_fit(image, self.max_dimension)
    }
}

/// Area-averaging downscale preserving aspect ratio; new sides round down
pub fn resize_to_fit(image: &RgbImage, max_dimension: u32) -> Cow<'_, RgbImage> {
    let (width, height) = image.dimensions();
    let larger = width.max(height);

    if larger <= max_dimension {
        return Cow::Borrowed(image);
    }

    let new_width = ((width as u64 * max_dimension as u64) / larger as u64).max(1) as u32;
    let new_height = ((height as u64 * max_dimension as u64) / larger as u64).max(1) as u32;

    tracing::debug!(
        from_width = width,
        from_height = height,
        to_width = new_width,
        to_height = new_height,
        "resizing oversized image"
    );

    Cow::Owned(image::imageops::thumbnail(image, new_width, new_height))
}

/// Grayscale → bilateral smoothing → Gaussian adaptive threshold.
///
/// Produces a two-level image: ink is 0, background is 255.
pub fn to_ocr_preprocessed(image: &RgbImage) -> GrayImage {
    let gray = image::imageops::grayscale(image);
    let smoothed =
        filters::bilateral_filter(&gray, BILATERAL_DIAMETER, BILATERAL_SIGMA, BILATERAL_SIGMA);
    filters::adaptive_threshold_gaussian(&smoothed, THRESHOLD_BLOCK_SIZE, THRESHOLD_OFFSET)
}

/// JPEG re-encode wrapped in a base64 data URL, for inline display only
pub fn encode_for_display(image: &RgbImage) -> Result<String> {
    let mut buffer = Vec::new();
    image
        .write_with_encoder(JpegEncoder::new_with_quality(
            &mut buffer,
            DISPLAY_JPEG_QUALITY,
        ))
        .context("Failed to encode display image")?;

    Ok(format!("{}{}", DISPLAY_PREFIX, STANDARD.encode(&buffer)))
}
