//! Job Repository
//!
//! Handles the per-job scheduling state: pending "next build inputs",
//! manual trigger requests and configuration errors.

use chrono::{DateTime, Utc};
use conveyor_core::domain::job::JobId;
use conveyor_core::domain::mapping::{InputMapping, PendingInputs};
use conveyor_core::dto::job::JobSchedulingStatus;
use sqlx::PgPool;

use super::{RepositoryError, Result};

/// Load the pending inputs of a job
pub async fn find_pending(pool: &PgPool, job_id: JobId) -> Result<Option<PendingInputs>> {
    let row = sqlx::query_as::<_, PendingRow>(
        r#"
        SELECT job_id, snapshot_id, mappings, resolved_at
        FROM pending_build_inputs
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Upsert the pending inputs of a job unless a newer snapshot already landed
///
/// Returns whether the row was written.
pub async fn save_pending(pool: &PgPool, pending: &PendingInputs) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO pending_build_inputs (job_id, snapshot_id, mappings, resolved_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (job_id) DO UPDATE
        SET snapshot_id = EXCLUDED.snapshot_id,
            mappings = EXCLUDED.mappings,
            resolved_at = EXCLUDED.resolved_at
        WHERE pending_build_inputs.snapshot_id <= EXCLUDED.snapshot_id
        "#,
    )
    .bind(pending.job_id)
    .bind(pending.snapshot_id)
    .bind(serde_json::to_value(&pending.mappings)?)
    .bind(pending.resolved_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Flag a job for a manual trigger
pub async fn request_manual_trigger(pool: &PgPool, job_id: JobId) -> Result<()> {
    let result = sqlx::query("UPDATE jobs SET manual_trigger_requested = TRUE WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("job {}", job_id)));
    }

    Ok(())
}

/// Whether a job has a manual trigger waiting
pub async fn manual_trigger_requested(pool: &PgPool, job_id: JobId) -> Result<bool> {
    let requested: Option<bool> =
        sqlx::query_scalar("SELECT manual_trigger_requested FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await?;

    Ok(requested.unwrap_or(false))
}

/// Clear a job's manual trigger flag, returning whether it was set
pub async fn take_manual_trigger(pool: &PgPool, job_id: JobId) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET manual_trigger_requested = FALSE
        WHERE id = $1 AND manual_trigger_requested
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Store or clear a job's configuration error
pub async fn set_config_error(pool: &PgPool, job_id: JobId, error: Option<String>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET config_error = $1
        WHERE id = $2 AND config_error IS DISTINCT FROM $1
        "#,
    )
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Scheduling status of a job, if the job exists
pub async fn find_status(pool: &PgPool, job_id: JobId) -> Result<Option<JobSchedulingStatus>> {
    let row = sqlx::query_as::<_, JobStateRow>(
        "SELECT config_error, manual_trigger_requested FROM jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let pending = find_pending(pool, job_id).await?;

    Ok(Some(JobSchedulingStatus::new(
        job_id,
        pending,
        row.config_error,
        row.manual_trigger_requested,
    )))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PendingRow {
    job_id: i64,
    snapshot_id: i64,
    mappings: serde_json::Value,
    resolved_at: DateTime<Utc>,
}

impl TryFrom<PendingRow> for PendingInputs {
    type Error = RepositoryError;

    fn try_from(row: PendingRow) -> std::result::Result<Self, Self::Error> {
        let mappings: Vec<InputMapping> = serde_json::from_value(row.mappings)?;

        Ok(PendingInputs {
            job_id: row.job_id,
            snapshot_id: row.snapshot_id,
            mappings,
            resolved_at: row.resolved_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobStateRow {
    config_error: Option<String>,
    manual_trigger_requested: bool,
}
