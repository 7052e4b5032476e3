use thiserror::Error;

const MIB: usize = 1024 * 1024;

/// Upload rejected before any decoding happened
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("File size exceeds {}MB limit", .limit / MIB)]
    TooLarge { size: usize, limit: usize },

    #[error("Unsupported format. Use: {supported}")]
    UnsupportedFormat { declared: String, supported: String },

    #[error("Invalid image file: {0}")]
    InvalidImage(String),
}

impl ValidationError {
    /// Short label used for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::TooLarge { .. } => "too_large",
            ValidationError::UnsupportedFormat { .. } => "unsupported_format",
            ValidationError::InvalidImage(_) => "invalid_image",
        }
    }
}

/// Bytes passed validation but the codec could not produce a pixel grid
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to process image: {0}")]
    Codec(#[from] image::ImageError),

    #[error("Failed to process image: image has no pixels")]
    Empty,
}

/// Classifier or recognizer could not be made ready; fatal at startup
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to fetch model from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("model file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cascade model: {0}")]
    InvalidCascade(String),

    #[error("unsupported OCR language '{0}'")]
    UnsupportedLanguage(String),

    #[error("failed to initialize recognition engine: {0}")]
    Recognizer(String),
}

/// Anything that stops one pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("internal pipeline failure: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the failure is the client's fault (bad upload) rather than ours
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Validation(_) | PipelineError::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_large_message_cites_limit() {
        let err = ValidationError::TooLarge {
            size: 15 * MIB,
            limit: 10 * MIB,
        };
        assert_eq!(err.to_string(), "File size exceeds 10MB limit");
        assert_eq!(err.reason(), "too_large");
    }

    #[test]
    fn test_client_error_classification() {
        let validation: PipelineError = ValidationError::InvalidImage("truncated".into()).into();
        assert!(validation.is_client_error());

        let decode: PipelineError = DecodeError::Empty.into();
        assert!(decode.is_client_error());

        let internal: PipelineError = anyhow::anyhow!("boom").into();
        assert!(!internal.is_client_error());
    }
}
