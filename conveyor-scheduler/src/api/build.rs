//! Build API Handlers
//!
//! HTTP endpoint through which the executor reports finished builds.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conveyor_core::domain::build::BuildId;
use conveyor_core::dto::build::FinishBuild;
use sqlx::PgPool;

use crate::api::error::{ApiError, ApiResult};
use crate::repository::build_repository;

/// POST /build/{id}/finish
/// Record a build's final status and the versions it produced
pub async fn finish_build(
    State(pool): State<PgPool>,
    Path(id): Path<BuildId>,
    Json(req): Json<FinishBuild>,
) -> ApiResult<StatusCode> {
    if !req.status.is_finished() {
        return Err(ApiError::BadRequest(format!(
            "Build status {} is not a final status",
            req.status
        )));
    }

    tracing::info!("Finishing build: {} with status {}", id, req.status);

    build_repository::finish(&pool, id, req.status, &req.outputs).await?;

    Ok(StatusCode::NO_CONTENT)
}
