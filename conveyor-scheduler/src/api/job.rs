//! Job API Handlers
//!
//! HTTP endpoints for inspecting a job's scheduling state and requesting
//! manual builds.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conveyor_core::domain::job::JobId;
use conveyor_core::dto::job::JobSchedulingStatus;
use sqlx::PgPool;

use crate::api::error::{ApiError, ApiResult};
use crate::repository::job_repository;

/// GET /job/{id}/status
/// Get a job's pending inputs, configuration error and trigger request
pub async fn get_status(
    State(pool): State<PgPool>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobSchedulingStatus>> {
    tracing::debug!("Getting scheduling status of job: {}", id);

    let status = job_repository::find_status(&pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", id)))?;

    Ok(Json(status))
}

/// POST /job/{id}/trigger
/// Request a manual build of the job's newest pending inputs
pub async fn trigger_job(State(pool): State<PgPool>, Path(id): Path<JobId>) -> ApiResult<StatusCode> {
    tracing::info!("Manual trigger requested for job: {}", id);

    job_repository::request_manual_trigger(&pool, id).await?;

    Ok(StatusCode::ACCEPTED)
}
