use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::model::{HealthResponse, ProbeResponse};
use crate::AppState;

// ============================================================================
// Health Endpoints
// ============================================================================

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Kubernetes liveness probe - returns 200 if the process is running
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses((status = 200, description = "Process is alive", body = ProbeResponse))
)]
pub async fn liveness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse {
        status: "LIVE".to_string(),
    })
}

/// Kubernetes readiness probe - returns 200 when the store answers
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Ready to accept traffic", body = ProbeResponse),
        (status = 503, description = "Store unreachable", body = ProbeResponse)
    )
)]
pub async fn readiness_probe(State(state): State<AppState>) -> (StatusCode, Json<ProbeResponse>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ProbeResponse {
                status: "READY".to_string(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ProbeResponse {
                    status: "NOT_READY".to_string(),
                }),
            )
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Prometheus metrics endpoint
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "monitoring",
    responses(
        (status = 200, description = "Prometheus text exposition", content_type = "text/plain"),
        (status = 404, description = "No recorder installed")
    )
)]
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
