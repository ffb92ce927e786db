//! API route definitions

use crate::service::{CatalogService, WorkerService};
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
    pub worker: Arc<WorkerService>,
    pub catalog: Arc<CatalogService>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    // Model IDs contain '/', so they travel in bodies and query strings.
    let tenant = Router::new()
        // Base models
        .route(
            "/base-models",
            get(handlers::list_base_models)
                .post(handlers::create_base_model)
                .delete(handlers::delete_base_model),
        )
        .route("/base-models/acquire", post(handlers::acquire_base_model))
        .route("/base-models/requests", post(handlers::request_base_model))
        .route(
            "/base-models/status",
            post(handlers::update_base_model_status),
        )
        .route("/base-models/path", get(handlers::get_base_model_path))
        // Fine-tuned models
        .route("/models", post(handlers::register_model))
        .route("/models/acquire", post(handlers::acquire_model))
        .route("/models/status", post(handlers::update_model_status))
        .route("/models/publish", post(handlers::publish_model))
        .route("/models/path", get(handlers::get_model_path))
        // Hugging Face repos and storage
        .route(
            "/hf-model-repos",
            get(handlers::get_hf_model_repo).post(handlers::create_hf_model_repo),
        )
        .route(
            "/storage-config",
            get(handlers::get_storage_config).post(handlers::create_storage_config),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .nest("/v1/tenants/{tenant}", tenant)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
