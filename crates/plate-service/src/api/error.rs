use crate::error::PipelineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "detail": message,
        }));

        (status, body).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        if err.is_client_error() {
            return ApiError::bad_request(err.to_string());
        }

        // Internal details stay in the log.
        tracing::error!(error = %err, "plate pipeline failed");
        ApiError::internal("Error processing image")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, ValidationError};

    #[test]
    fn test_pipeline_error_mapping() {
        let err: ApiError = PipelineError::from(ValidationError::UnsupportedFormat {
            declared: "image/gif".into(),
            supported: "image/png".into(),
        })
        .into();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "Unsupported format. Use: image/png"));

        let err: ApiError = PipelineError::from(DecodeError::Empty).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err: ApiError = PipelineError::Internal(anyhow::anyhow!("session poisoned")).into();
        assert!(matches!(err, ApiError::Internal(ref m) if !m.contains("poisoned")));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
