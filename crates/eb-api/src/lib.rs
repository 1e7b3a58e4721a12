//! EventBook HTTP API
//!
//! Routes:
//! - `POST /v1/events` publish an event
//! - `GET /v1/events` and `GET /v1/events/{id}` availability (`?admin=true` adds registrations)
//! - `POST /v1/events/{id}/book` reserve a seat
//! - `POST /v1/events/{id}/confirm` confirm a pending registration
//! - `/health`, `/health/live`, `/health/ready`, `/metrics`, `/api-doc/openapi.json`

use axum::{
    routing::{get, post},
    Json, Router,
};
use eb_booking::{BookingService, ConfirmationService, EventCatalog};
use eb_store::Store;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

pub mod error;
pub mod handlers;
pub mod health;
pub mod model;
pub mod validation;

pub use error::ApiError;
pub use validation::{RequestValidator, ValidationError};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<EventCatalog>,
    pub booking: Arc<BookingService>,
    pub confirmation: Arc<ConfirmationService>,
    /// Used by the readiness probe
    pub store: Arc<dyn Store>,
    pub validator: Arc<RequestValidator>,
    /// Absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "EventBook API",
        description = "Capacity-limited event booking with pending holds and confirmation"
    ),
    tags(
        (name = "events", description = "Event publishing and availability"),
        (name = "registrations", description = "Booking and confirmation"),
        (name = "health", description = "Probes"),
        (name = "monitoring", description = "Metrics")
    ),
    paths(
        handlers::create_event,
        handlers::list_events,
        handlers::get_event,
        handlers::book,
        handlers::confirm,
        health::health_handler,
        health::liveness_probe,
        health::readiness_probe,
        health::metrics_handler,
    )
)]
pub struct ApiDoc;

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Create the full router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/events", get(handlers::list_events).post(handlers::create_event))
        .route("/events/:id", get(handlers::get_event))
        .route("/events/:id/book", post(handlers::book))
        .route("/events/:id/confirm", post(handlers::confirm));

    Router::new()
        .nest("/v1", api)
        // Kubernetes probes
        .route("/health", get(health::health_handler))
        .route("/health/live", get(health::liveness_probe))
        .route("/health/ready", get(health::readiness_probe))
        // Prometheus metrics
        .route("/metrics", get(health::metrics_handler))
        .route("/api-doc/openapi.json", get(openapi_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
