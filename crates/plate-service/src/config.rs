use crate::extractor::OnnxRecognizerConfig;
use crate::model_store::{CASCADE_FILE_NAME, CASCADE_URL};
use crate::normalizer::{MAX_DIMENSION, MAX_FILE_SIZE};
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct PlateServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Upload size limit in bytes
    pub max_file_size: usize,

    /// Larger image side after normalization
    pub max_dimension: u32,

    /// Local cache path of the plate cascade
    pub cascade_path: PathBuf,

    /// Where to fetch the cascade from when it is not cached
    pub cascade_url: String,

    /// Text recognizer settings
    pub recognizer: OnnxRecognizerConfig,

    /// Font for the overlay label text (optional)
    pub overlay_font_path: Option<PathBuf>,

    /// Node ID for this service instance
    pub node_id: String,
}

impl PlateServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("PLATE_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let max_file_size = parse_var("MAX_FILE_SIZE")?.unwrap_or(MAX_FILE_SIZE);
        let max_dimension = parse_var("MAX_DIMENSION")?.unwrap_or(MAX_DIMENSION);

        let cascade_path = env::var("CASCADE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models").join(CASCADE_FILE_NAME));
        let cascade_url = env::var("CASCADE_URL").unwrap_or_else(|_| CASCADE_URL.to_string());

        let mut recognizer = OnnxRecognizerConfig::default();
        if let Ok(path) = env::var("OCR_MODEL_PATH") {
            recognizer.model_path = path;
        }
        if let Ok(languages) = env::var("OCR_LANGUAGES") {
            recognizer.languages = parse_languages(&languages);
        }
        if let Some(gpu) = env::var("OCR_GPU").ok().map(|v| parse_bool(&v)) {
            recognizer.gpu = gpu;
        }

        let overlay_font_path = env::var("OVERLAY_FONT_PATH").ok().map(PathBuf::from);

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "plate-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        Ok(Self {
            bind_addr,
            max_file_size,
            max_dimension,
            cascade_path,
            cascade_url,
            recognizer,
            overlay_font_path,
            node_id,
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .ok()
        .map(|v| v.trim().parse::<T>().with_context(|| format!("Invalid {}", name)))
        .transpose()
}

fn parse_languages(value: &str) -> Vec<String> {
    let languages: Vec<String> = value
        .split(',')
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty())
        .collect();

    if languages.is_empty() {
        vec!["en".to_string()]
    } else {
        languages
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
