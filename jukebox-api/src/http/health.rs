//! Health and metrics endpoints for monitoring probes.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::http::{AppError, AppState};

pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
}

/// Always OK while the process serves requests
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Prometheus text exposition
pub async fn metrics() -> Result<impl IntoResponse, AppError> {
    let body = jukebox_core::metrics::gather_metrics().map_err(|e| {
        tracing::error!("Failed to encode metrics: {}", e);
        AppError::internal("Failed to encode metrics")
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
