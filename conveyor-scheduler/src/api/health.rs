//! Health Check API Handler
//!
//! Health check endpoint for monitoring. Reports unhealthy when the database
//! can't be reached.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;

/// GET /health
/// Health check endpoint
pub async fn health_check(State(pool): State<PgPool>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}
