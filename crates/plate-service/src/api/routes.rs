use super::error::ApiError;
use crate::error::ValidationError;
use crate::normalizer::SUPPORTED_FORMATS;
use crate::state::PlateServiceState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::plates::{ApiInfo, UploadResponse};
use serde_json::json;

pub const SERVICE_NAME: &str = "License Plate OCR API";
pub const SERVICE_VERSION: &str = "1.0.0";

/// Upload an image and read the plate in it
pub async fn upload(
    State(state): State<PlateServiceState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let limit = state.pipeline().normalizer().max_file_size();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;

        tracing::info!(
            filename = %filename,
            content_type = %content_type,
            bytes = bytes.len(),
            "received upload"
        );
        upload = Some((bytes.to_vec(), content_type));
        break;
    }

    let (bytes, content_type) =
        upload.ok_or_else(|| ApiError::bad_request("Missing multipart field 'file'"))?;

    let result = state.process_upload(bytes, content_type).await?;
    Ok(Json(UploadResponse::from(result)))
}

fn multipart_error(err: axum::extract::multipart::MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::bad_request(ValidationError::TooLarge { size: 0, limit }.to_string());
    }
    ApiError::bad_request(format!("Invalid multipart body: {}", err.body_text()))
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": SERVICE_NAME
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<PlateServiceState>) -> impl IntoResponse {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "node_id": state.node_id()
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "node_id": state.node_id()
            })),
        )
    }
}

/// Service capabilities
pub async fn api_info(State(state): State<PlateServiceState>) -> Json<ApiInfo> {
    let max_mb = state.pipeline().normalizer().max_file_size() as f64 / (1024.0 * 1024.0);

    Json(ApiInfo {
        name: SERVICE_NAME.to_string(),
        version: SERVICE_VERSION.to_string(),
        features: [
            "License plate detection using a Haar cascade with contour fallback",
            "Text extraction using an ONNX recognition model",
            "Support for multiple image formats (JPEG, PNG, WebP)",
            "Automatic image preprocessing",
            "Confidence scoring",
        ]
        .iter()
        .map(|f| f.to_string())
        .collect(),
        supported_formats: SUPPORTED_FORMATS.iter().map(|f| f.to_string()).collect(),
        max_file_size: format!("{:.0}MB", max_mb),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
                .into_response()
        }
    }
}
