/// Text recognition with a CRNN/CTC model on ONNX Runtime
///
/// The plate crop is split into text runs, each run is resized to the model
/// input and decoded greedily. A run's confidence is the mean of the
/// per-step maximum probabilities of the characters it emitted.
use super::{segment, TextRecognizer};
use crate::error::ModelLoadError;
use anyhow::{Context, Result};
use common::plates::TextCandidate;
use image::RgbImage;
use ndarray::{Array, ArrayD, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use telemetry::metrics::PLATE_OCR_INFERENCE_TIME;

/// Languages the bundled vocabulary covers
pub const SUPPORTED_LANGUAGES: &[&str] = &["en"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxRecognizerConfig {
    /// Path to the recognition ONNX model file
    pub model_path: String,

    /// Character vocabulary; CTC blank is index 0, so the vocabulary starts at index 1
    #[serde(default = "default_char_vocab")]
    pub char_vocab: String,

    /// Recognition languages
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Prefer CUDA (with CPU fallback) over plain CPU
    #[serde(default)]
    pub gpu: bool,

    /// GPU device ID (0, 1, 2, etc.)
    #[serde(default)]
    pub device_id: i32,

    /// Model input width
    #[serde(default = "default_input_width")]
    pub input_width: u32,

    /// Model input height
    #[serde(default = "default_input_height")]
    pub input_height: u32,

    /// Number of intra-operation threads
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    /// Number of inter-operation threads
    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,
}

fn default_char_vocab() -> String {
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}

fn default_input_width() -> u32 {
    200
}

fn default_input_height() -> u32 {
    64
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

impl Default for OnnxRecognizerConfig {
    fn default() -> Self {
        Self {
            model_path: "models/plate_ocr.onnx".to_string(),
            char_vocab: default_char_vocab(),
            languages: default_languages(),
            gpu: false,
            device_id: 0,
            input_width: default_input_width(),
            input_height: default_input_height(),
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
        }
    }
}

impl OnnxRecognizerConfig {
    /// Reject languages the vocabulary does not cover
    pub fn check_languages(&self) -> Result<(), ModelLoadError> {
        for language in &self.languages {
            let language = language.trim().to_ascii_lowercase();
            if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
                return Err(ModelLoadError::UnsupportedLanguage(language));
            }
        }
        Ok(())
    }
}

pub struct OnnxTextRecognizer {
    config: OnnxRecognizerConfig,
    vocab: Vec<char>,
    session: Mutex<Session>,
    execution_provider: String,
}

impl OnnxTextRecognizer {
    /// Load the model; any failure here is fatal for the service
    pub fn new(config: OnnxRecognizerConfig) -> Result<Self, ModelLoadError> {
        config.check_languages()?;

        if !Path::new(&config.model_path).is_file() {
            return Err(ModelLoadError::Io {
                path: config.model_path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "model file not found"),
            });
        }

        let (session, execution_provider) = create_session(&config)
            .map_err(|e| ModelLoadError::Recognizer(format!("{:#}", e)))?;

        tracing::info!(
            model = %config.model_path,
            execution_provider = %execution_provider,
            languages = ?config.languages,
            "text recognizer ready"
        );

        Ok(Self {
            vocab: config.char_vocab.chars().collect(),
            config,
            session: Mutex::new(session),
            execution_provider,
        })
    }

    pub fn execution_provider(&self) -> &str {
        &self.execution_provider
    }

    /// Resize a run to the model input, NCHW grayscale in [0, 1]
    fn preprocess(&self, run: &RgbImage) -> ArrayD<f32> {
        let width = self.config.input_width;
        let height = self.config.input_height;
        let gray = image::imageops::grayscale(run);
        let resized =
            image::imageops::resize(&gray, width, height, image::imageops::FilterType::Triangle);

        let mut input = Array::zeros(IxDyn(&[1, 1, height as usize, width as usize]));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        }
        input
    }

    fn recognize_run(&self, run: &RgbImage) -> Result<(String, f32)> {
        let input_tensor = Value::from_array(self.preprocess(run))?;

        let start = Instant::now();
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock OCR session: {}", e))?;
        let outputs = session.run(ort::inputs![input_tensor])?;

        // Expected shape: [batch, sequence_length, vocab_size] or [sequence_length, batch, vocab_size]
        let output_value = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .or_else(|| outputs.get("logits"))
            .context("No OCR output tensor found (tried: output, output0, logits)")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;

        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;
        drop(outputs);
        drop(session);

        PLATE_OCR_INFERENCE_TIME
            .with_label_values(&[self.execution_provider.as_str()])
            .observe(start.elapsed().as_secs_f64());

        ctc_greedy_decode(&output, &self.vocab)
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextCandidate>> {
        let runs = segment::find_text_runs(image);
        let mut candidates = Vec::with_capacity(runs.len());

        for run in &runs {
            let pixels =
                image::imageops::crop_imm(image, run.x, run.y, run.width, run.height).to_image();
            let (text, confidence) = self
                .recognize_run(&pixels)
                .with_context(|| format!("Recognition failed for run at ({}, {})", run.x, run.y))?;
            if !text.is_empty() {
                candidates.push(TextCandidate::new(text, confidence));
            }
        }

        tracing::debug!(
            runs = runs.len(),
            candidates = candidates.len(),
            "text recognition finished"
        );

        Ok(candidates)
    }
}

/// Create an ONNX session, CUDA first when a GPU is requested
fn create_session(config: &OnnxRecognizerConfig) -> Result<(Session, String)> {
    if config.gpu {
        try_cuda(config)
    } else {
        try_cpu(config)
    }
}

fn try_cuda(config: &OnnxRecognizerConfig) -> Result<(Session, String)> {
    tracing::info!("Attempting CUDA for {}", config.model_path);
    let result = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])
        .context("Failed to set execution providers")?
        .commit_from_file(&config.model_path);

    match result {
        Ok(session) => {
            tracing::info!("CUDA configured for {}", config.model_path);
            Ok((session, "CUDA".to_string()))
        }
        Err(e) => {
            tracing::warn!("CUDA failed, using CPU: {}", e);
            try_cpu(config)
        }
    }
}

fn try_cpu(config: &OnnxRecognizerConfig) -> Result<(Session, String)> {
    tracing::info!("Using CPU for {}", config.model_path);
    let session = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .commit_from_file(&config.model_path)
        .context("Failed to load model from file")?;
    Ok((session, "CPU".to_string()))
}

/// CTC greedy decoding over a `[1, T, C]` or `[T, 1, C]` score tensor.
///
/// Scores that are not already probabilities are passed through softmax.
/// Returns the text and the mean winning probability of emitted characters
/// (0.0 when nothing was emitted).
pub fn ctc_greedy_decode(output: &ArrayD<f32>, vocab: &[char]) -> Result<(String, f32)> {
    let shape = output.shape();
    if shape.len() != 3 {
        anyhow::bail!("Unexpected OCR output rank {} (shape {:?})", shape.len(), shape);
    }
    let time_major = shape[0] != 1 && shape[1] == 1;
    let (steps, classes) = if time_major {
        (shape[0], shape[2])
    } else {
        (shape[1], shape[2])
    };

    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut prev_idx = 0; // CTC blank

    for t in 0..steps {
        let row: Vec<f32> = (0..classes)
            .map(|c| {
                if time_major {
                    output[[t, 0, c]]
                } else {
                    output[[0, t, c]]
                }
            })
            .collect();
        let probs = as_probabilities(row);

        let (max_idx, max_prob) = probs
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        if max_idx > 0 && max_idx != prev_idx {
            if let Some(&ch) = vocab.get(max_idx - 1) {
                text.push(ch);
                confidences.push(max_prob);
            }
        }
        prev_idx = max_idx;
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    Ok((text, confidence))
}

fn as_probabilities(row: Vec<f32>) -> Vec<f32> {
    let total: f32 = row.iter().sum();
    let in_range = row.iter().all(|p| (0.0..=1.0).contains(p));
    if in_range && (total - 1.0).abs() < 1e-3 {
        return row;
    }

    let max = row.iter().copied().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vec<char> {
        default_char_vocab().chars().collect()
    }

    /// One-hot-ish `[1, T, C]` tensor from a list of (class index, probability)
    fn scores(steps: &[(usize, f32)], classes: usize) -> ArrayD<f32> {
        let mut output = Array::zeros(IxDyn(&[1, steps.len(), classes]));
        for (t, &(idx, p)) in steps.iter().enumerate() {
            let rest = (1.0 - p) / (classes - 1) as f32;
            for c in 0..classes {
                output[[0, t, c]] = if c == idx { p } else { rest };
            }
        }
        output
    }

    #[test]
    fn test_config_defaults() {
        let config: OnnxRecognizerConfig =
            serde_json::from_str(r#"{"model_path": "models/ocr.onnx"}"#).unwrap();
        assert_eq!(config.languages, vec!["en".to_string()]);
        assert!(!config.gpu);
        assert_eq!(config.input_width, 200);
        assert_eq!(config.input_height, 64);
        assert_eq!(config.char_vocab, "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-");
    }

    #[test]
    fn test_unsupported_language_rejected() {
        let config = OnnxRecognizerConfig {
            languages: vec!["en".into(), "ru".into()],
            ..Default::default()
        };
        assert!(matches!(
            config.check_languages(),
            Err(ModelLoadError::UnsupportedLanguage(lang)) if lang == "ru"
        ));
        assert!(OnnxRecognizerConfig::default().check_languages().is_ok());
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let config = OnnxRecognizerConfig {
            model_path: "/nonexistent/plate_ocr.onnx".into(),
            ..Default::default()
        };
        assert!(matches!(
            OnnxTextRecognizer::new(config),
            Err(ModelLoadError::Io { .. })
        ));
    }

    #[test]
    fn test_ctc_decode_collapses_repeats_and_blanks() {
        let classes = vocab().len() + 1;
        // A=11, B=12, 1=2 (blank at 0)
        let output = scores(
            &[(11, 0.9), (11, 0.8), (0, 0.9), (11, 0.7), (12, 0.6), (0, 0.9), (2, 1.0)],
            classes,
        );

        let (text, confidence) = ctc_greedy_decode(&output, &vocab()).unwrap();
        assert_eq!(text, "AAB1");
        assert!((confidence - (0.9 + 0.7 + 0.6 + 1.0) / 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_ctc_decode_all_blank() {
        let classes = vocab().len() + 1;
        let output = scores(&[(0, 0.9), (0, 0.95)], classes);
        assert_eq!(ctc_greedy_decode(&output, &vocab()).unwrap(), (String::new(), 0.0));
    }

    #[test]
    fn test_ctc_decode_time_major_logits() {
        let classes = vocab().len() + 1;
        let mut output = Array::zeros(IxDyn(&[2, 1, classes]));
        output[[0, 0, 8]] = 12.0; // '7'
        output[[1, 0, 0]] = 12.0;

        let (text, confidence) = ctc_greedy_decode(&output, &vocab()).unwrap();
        assert_eq!(text, "7");
        assert!(confidence > 0.99);
    }

    #[test]
    fn test_ctc_decode_rejects_bad_rank() {
        let output = Array::zeros(IxDyn(&[4, 5]));
        assert!(ctc_greedy_decode(&output, &vocab()).is_err());
    }
}
