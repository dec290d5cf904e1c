//! Route assembly
//!
//! The full gateway surface on one router: ingestion (sync and async), job
//! polling, search, image metadata/lifecycle, and the operational endpoints.

use axum::routing::{delete, get, patch, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};
use crate::services::Services;

/// CORS policy for browser clients
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the application router
pub fn create_router(services: Arc<Services>) -> Router {
    let state = AppState { services };

    Router::new()
        // Ingestion
        .route("/images", post(handlers::ingest_image))
        .route("/images/async", post(handlers::ingest_image_async))
        .route("/jobs/:job_id", get(handlers::get_job_status))
        // Search
        .route("/search", get(handlers::search))
        // Metadata and lifecycle
        .route("/images", get(handlers::list_images))
        .route("/images/:id", get(handlers::get_image))
        .route("/images/:id/download", get(handlers::download_image))
        .route("/images/:id/thumbnail", get(handlers::download_thumbnail))
        .route("/images/:id", patch(handlers::update_image))
        .route("/images/:id", delete(handlers::delete_image))
        // Operational
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/stats/router", get(handlers::router_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer()),
        )
        .with_state(state)
}
