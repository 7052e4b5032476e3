/// One upload through normalize → localize → crop → extract
use crate::error::PipelineError;
use crate::extractor::{select_plate_candidate, TextRecognizer};
use crate::localizer::overlay::default_font;
use crate::localizer::{draw_overlay, PlateClassifier, PlateLocalizer};
use crate::normalizer::{encode_for_display, to_ocr_preprocessed, ImageNormalizer};
use ab_glyph::FontArc;
use anyhow::Context;
use common::plates::{PlateOutcome, PlateResult};
use image::{DynamicImage, RgbImage};
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics::{
    PLATE_DETECTIONS, PLATE_PIPELINE_LATENCY, PLATE_UPLOADS, PLATE_UPLOADS_REJECTED,
};

/// Shared, read-only recognition pipeline
#[derive(Clone)]
pub struct PlatePipeline {
    normalizer: ImageNormalizer,
    localizer: PlateLocalizer,
    recognizer: Arc<dyn TextRecognizer>,
    font: Option<FontArc>,
}

impl PlatePipeline {
    pub fn new(
        normalizer: ImageNormalizer,
        classifier: Arc<dyn PlateClassifier>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        let font = match default_font() {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!(error = %e, "overlay labels will be drawn without text");
                None
            }
        };

        Self {
            normalizer,
            localizer: PlateLocalizer::new(classifier),
            recognizer,
            font,
        }
    }

    /// Render the overlay label text with this font instead of the bundled one
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn normalizer(&self) -> &ImageNormalizer {
        &self.normalizer
    }

    /// Validate, decode and recognize one upload
    pub fn process(&self, bytes: &[u8], declared_mime: &str) -> Result<PlateResult, PipelineError> {
        let start = Instant::now();
        let result = self.run(bytes, declared_mime);

        let label = match &result {
            Ok(r) => r.outcome.as_str(),
            Err(PipelineError::Validation(e)) => {
                PLATE_UPLOADS_REJECTED.with_label_values(&[e.reason()]).inc();
                "rejected"
            }
            Err(PipelineError::Decode(_)) => {
                PLATE_UPLOADS_REJECTED.with_label_values(&["decode"]).inc();
                "rejected"
            }
            Err(PipelineError::Internal(_)) => "error",
        };
        PLATE_UPLOADS.with_label_values(&[label]).inc();
        PLATE_PIPELINE_LATENCY
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        result
    }

    fn run(&self, bytes: &[u8], declared_mime: &str) -> Result<PlateResult, PipelineError> {
        self.normalizer.validate(bytes, declared_mime)?;
        let decoded = ImageNormalizer::decode(bytes)?;
        let image = self.normalizer.resize_if_oversized(&decoded);

        tracing::debug!(
            bytes = bytes.len(),
            width = image.width(),
            height = image.height(),
            "decoded upload"
        );

        self.recognize_image(&image)
    }

    /// Recognize an already decoded and normalized image
    pub fn recognize_image(&self, image: &RgbImage) -> Result<PlateResult, PipelineError> {
        let Some(crop) = self.localizer.get_best_plate(image) else {
            tracing::info!(outcome = PlateOutcome::NoPlateFound.as_str(), "no plate region found");
            return Ok(PlateResult::no_plate_found(encode_for_display(image)?));
        };

        PLATE_DETECTIONS
            .with_label_values(&[crop.source.as_str()])
            .inc();

        let overlay = draw_overlay(image, &[crop.bounding_box], self.font.as_ref());
        let original_image = encode_for_display(&overlay)?;
        let plate_image = encode_for_display(&crop.image)?;

        let binarized = DynamicImage::ImageLuma8(to_ocr_preprocessed(&crop.image)).to_rgb8();
        let candidates = self
            .recognizer
            .recognize(&binarized)
            .context("Text recognition failed")?;

        let result = match select_plate_candidate(&candidates) {
            Some((text, confidence)) if !text.is_empty() => PlateResult::success(
                text,
                confidence,
                crop.bounding_box,
                original_image,
                plate_image,
            ),
            _ => PlateResult::plate_found_no_text(crop.bounding_box, original_image, plate_image),
        };

        tracing::info!(
            outcome = result.outcome.as_str(),
            source = crop.source.as_str(),
            candidates = candidates.len(),
            plate_text = result.plate_text.as_deref().unwrap_or(""),
            confidence = result.confidence,
            "plate recognition finished"
        );

        Ok(result)
    }
}
