//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::services::PipelineStatus;
use crate::AppState;

/// Health check response: status, module name, version and pipeline snapshot
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub pipeline: PipelineStatus,
}

/// GET /health
///
/// Reports "degraded" while the most recent cycle failed.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let pipeline = state.status.borrow().clone();
    let status = if pipeline.last_error.is_some() {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "kmedia-chronicle".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipeline,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
