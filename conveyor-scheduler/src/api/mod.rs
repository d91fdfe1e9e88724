//! API Module
//!
//! HTTP API layer for the scheduler.
//! Each submodule handles endpoints for a specific domain.

pub mod build;
pub mod error;
pub mod health;
pub mod job;

use axum::{
    Router,
    routing::{get, post},
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

/// Create the main API router with all endpoints
pub fn create_router(pool: PgPool) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/job/{id}/status", get(job::get_status))
        .route("/job/{id}/trigger", post(job::trigger_job))
        // Build endpoints
        .route("/build/{id}/finish", post(build::finish_build))
        // Add state and middleware
        .with_state(pool)
        .layer(TraceLayer::new_for_http())
}
