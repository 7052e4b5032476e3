pub mod error;
pub mod routes;

pub use error::ApiError;

use crate::state::PlateServiceState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Build the API router
pub fn router(state: PlateServiceState) -> Router {
    // Bodies up to twice the file limit reach validation and get its size message.
    let body_limit = state
        .pipeline()
        .normalizer()
        .max_file_size()
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health and metrics endpoints
        .route("/health", get(routes::health))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Recognition endpoints
        .route("/api/info", get(routes::api_info))
        .route("/upload", post(routes::upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
