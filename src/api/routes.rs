//! API route definitions

use crate::registry::Registry;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Catalog
        .route("/models", get(handlers::list_models))
        .route("/models/refresh", post(handlers::refresh_models))
        .route("/models/stats/global", get(handlers::global_stats))
        // Local lifecycle
        .route("/models/local", get(handlers::local_models))
        .route("/models/active", get(handlers::active_model))
        .route("/models/download-all", post(handlers::download_all))
        // Per model; ids containing '/' must be percent-encoded
        .route("/models/{id}", get(handlers::get_model))
        .route("/models/{id}/stats", get(handlers::model_stats))
        .route("/models/{id}/state", get(handlers::model_state))
        .route("/models/{id}/download", get(handlers::download_model))
        .route("/models/{id}/enable", post(handlers::enable_model))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
