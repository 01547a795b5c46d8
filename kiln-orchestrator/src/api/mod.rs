//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod build;
pub mod error;
pub mod health;
pub mod log;
pub mod repository;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::ServiceContext;

/// Create the main API router with all endpoints
pub fn create_router(ctx: ServiceContext) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Repository endpoints
        .route("/repository/create", post(repository::create_repository))
        .route("/repository/list", get(repository::list_repositories))
        .route(
            "/repository/{id}",
            get(repository::get_repository).delete(repository::delete_repository),
        )
        .route(
            "/repository/{id}/builds",
            get(repository::list_repository_builds),
        )
        // Build endpoints
        .route(
            "/build/{id}",
            get(build::get_build).delete(build::delete_build),
        )
        .route("/build/{id}/log", get(build::get_build_log))
        // Log endpoints
        .route("/log/{id}", get(log::get_log))
        // Add state and middleware
        .with_state(ctx)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
