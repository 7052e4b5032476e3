//! Text extraction from plate crops
pub mod onnx;
pub mod segment;
pub mod selection;

pub use onnx::{OnnxRecognizerConfig, OnnxTextRecognizer};
pub use selection::{clean_plate_text, select_plate_candidate};

use anyhow::Result;
use common::plates::TextCandidate;
use image::RgbImage;

/// Pre-trained text recognition engine
pub trait TextRecognizer: Send + Sync {
    /// One candidate per detected text run, in engine order
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextCandidate>>;
}

/// Every recognized text joined by single spaces, in engine order
pub fn extract_all_text(recognizer: &dyn TextRecognizer, image: &RgbImage) -> Result<String> {
    let candidates = recognizer.recognize(image)?;
    Ok(candidates
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" "))
}

/// Uppercase with all whitespace removed
pub fn format_plate_number(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Recognizer returning fixed candidates
    pub(crate) struct FixedRecognizer(pub Vec<TextCandidate>);

    impl TextRecognizer for FixedRecognizer {
        fn recognize(&self, _image: &RgbImage) -> Result<Vec<TextCandidate>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_extract_all_text_joins_in_order() {
        let recognizer = FixedRecognizer(vec![
            TextCandidate::new("IND", 0.4),
            TextCandidate::new("KA 05", 0.9),
            TextCandidate::new("MX 1234", 0.8),
        ]);
        let text = extract_all_text(&recognizer, &RgbImage::new(4, 4)).unwrap();
        assert_eq!(text, "IND KA 05 MX 1234");

        let empty = FixedRecognizer(Vec::new());
        assert_eq!(extract_all_text(&empty, &RgbImage::new(4, 4)).unwrap(), "");
    }

    #[test]
    fn test_format_plate_number() {
        assert_eq!(format_plate_number(" ab 12\tcd\n"), "AB12CD");
        assert_eq!(format_plate_number(""), "");
    }
}
