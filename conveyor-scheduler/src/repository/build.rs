//! Build Repository
//!
//! Creates builds from resolved input mappings and records their completion.

use conveyor_core::domain::build::{BuildId, BuildStatus};
use conveyor_core::domain::job::JobId;
use conveyor_core::domain::mapping::InputMapping;
use conveyor_core::dto::build::OutputVersion;
use sqlx::PgPool;

use super::{RepositoryError, Result};

/// Create a pending build whose inputs are `mapping`
///
/// The mapping is removed from the job's pending inputs in the same
/// transaction, so it is either pending or historical, never both.
pub async fn create(
    pool: &PgPool,
    job_id: JobId,
    mapping: &InputMapping,
    manually_triggered: bool,
) -> Result<BuildId> {
    let mut tx = pool.begin().await?;

    let build_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO builds (job_id, status, manually_triggered, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(job_id)
    .bind(status_to_string(BuildStatus::Pending))
    .bind(manually_triggered)
    .bind(chrono::Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    for (name, version) in mapping.iter() {
        sqlx::query("INSERT INTO build_inputs (build_id, name, version_id) VALUES ($1, $2, $3)")
            .bind(build_id)
            .bind(name)
            .bind(version.version_id)
            .execute(&mut *tx)
            .await?;
    }

    let pending: Option<serde_json::Value> = sqlx::query_scalar(
        "SELECT mappings FROM pending_build_inputs WHERE job_id = $1 FOR UPDATE",
    )
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(value) = pending {
        let mut mappings: Vec<InputMapping> = serde_json::from_value(value)?;
        mappings.retain(|pending| pending != mapping);

        sqlx::query("UPDATE pending_build_inputs SET mappings = $1 WHERE job_id = $2")
            .bind(serde_json::to_value(&mappings)?)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(build_id)
}

/// Record a build's final status
///
/// Succeeded builds pass on their inputs as implicit outputs, plus any
/// versions they produced.
pub async fn finish(
    pool: &PgPool,
    build_id: BuildId,
    status: BuildStatus,
    outputs: &[OutputVersion],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE builds
        SET status = $1, completed_at = $2
        WHERE id = $3 AND status = 'pending'
        "#,
    )
    .bind(status_to_string(status))
    .bind(chrono::Utc::now())
    .bind(build_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!(
            "unfinished build {}",
            build_id
        )));
    }

    if status == BuildStatus::Succeeded {
        sqlx::query(
            r#"
            INSERT INTO build_outputs (build_id, version_id)
            SELECT build_id, version_id FROM build_inputs WHERE build_id = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(build_id)
        .execute(&mut *tx)
        .await?;

        for output in outputs {
            sqlx::query(
                r#"
                INSERT INTO build_outputs (build_id, version_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(build_id)
            .bind(output.version_id)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    Ok(())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Pending => "pending",
        BuildStatus::Succeeded => "succeeded",
        BuildStatus::Failed => "failed",
        BuildStatus::Errored => "errored",
        BuildStatus::Aborted => "aborted",
    }
}
