//! Local cache for downloadable model artifacts.

use crate::error::ModelLoadError;
use std::path::{Path, PathBuf};

/// File name of the plate cascade artifact
pub const CASCADE_FILE_NAME: &str = "haarcascade_russian_plate_number.xml";

/// Stable location of the plate cascade
pub const CASCADE_URL: &str = "https://raw.githubusercontent.com/opencv/opencv/master/data/haarcascades/haarcascade_russian_plate_number.xml";

/// Make sure `path` exists, downloading it from `url` when it does not.
///
/// The download is written next to the target and renamed into place, so an
/// interrupted fetch never leaves a truncated artifact behind.
pub async fn ensure_model(path: &Path, url: &str) -> Result<PathBuf, ModelLoadError> {
    if path.is_file() {
        tracing::debug!(path = %path.display(), "model artifact already cached");
        return Ok(path.to_path_buf());
    }

    let io_err = |source: std::io::Error| ModelLoadError::Io {
        path: path.display().to_string(),
        source,
    };
    let fetch_err = |reason: String| ModelLoadError::Fetch {
        url: url.to_string(),
        reason,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    tracing::info!(url, path = %path.display(), "downloading model artifact");

    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| fetch_err(e.to_string()))?;
    let bytes = response.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
    if bytes.is_empty() {
        return Err(fetch_err("empty response body".to_string()));
    }

    let partial = path.with_extension("part");
    tokio::fs::write(&partial, &bytes).await.map_err(io_err)?;
    tokio::fs::rename(&partial, path).await.map_err(io_err)?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), "model artifact cached");

    Ok(path.to_path_buf())
}
