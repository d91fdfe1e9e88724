//! Versions Repository
//!
//! Builds a [`VersionsDB`] from the pipeline's resources, versions and build
//! history. Only succeeded builds contribute passed-on versions.

use conveyor_core::domain::build::{BuildInput, BuildOutput};
use conveyor_core::domain::pipeline::PipelineId;
use conveyor_core::domain::resource::ResourceVersion;
use sqlx::PgPool;

use super::Result;
use crate::algorithm::VersionsDB;

/// Load a fresh snapshot of a pipeline's version history
pub async fn load_versions_db(pool: &PgPool, pipeline_id: PipelineId) -> Result<VersionsDB> {
    // Reads run in one repeatable-read transaction so the snapshot is consistent
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    let snapshot_id: i64 = sqlx::query_scalar("SELECT nextval('versions_snapshot_seq')")
        .fetch_one(&mut *tx)
        .await?;

    let resources = sqlx::query_as::<_, NamedRow>(
        "SELECT id, name FROM resources WHERE pipeline_id = $1",
    )
    .bind(pipeline_id)
    .fetch_all(&mut *tx)
    .await?;

    let jobs = sqlx::query_as::<_, NamedRow>("SELECT id, name FROM jobs WHERE pipeline_id = $1")
        .bind(pipeline_id)
        .fetch_all(&mut *tx)
        .await?;

    let versions = sqlx::query_as::<_, VersionRow>(
        r#"
        SELECT v.id, v.resource_id, v.check_order, v.enabled
        FROM resource_versions v
        JOIN resources r ON r.id = v.resource_id
        WHERE r.pipeline_id = $1
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(&mut *tx)
    .await?;

    let inputs = sqlx::query_as::<_, BuildInputRow>(
        r#"
        SELECT b.job_id, i.build_id, i.name, v.resource_id, i.version_id
        FROM build_inputs i
        JOIN builds b ON b.id = i.build_id
        JOIN jobs j ON j.id = b.job_id
        JOIN resource_versions v ON v.id = i.version_id
        WHERE j.pipeline_id = $1
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(&mut *tx)
    .await?;

    let outputs = sqlx::query_as::<_, BuildOutputRow>(
        r#"
        SELECT b.job_id, o.build_id, v.resource_id, o.version_id
        FROM build_outputs o
        JOIN builds b ON b.id = o.build_id
        JOIN jobs j ON j.id = b.job_id
        JOIN resource_versions v ON v.id = o.version_id
        WHERE j.pipeline_id = $1 AND b.status = 'succeeded'
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::debug!(
        "Loaded versions snapshot {} for pipeline {}: {} versions, {} build inputs, {} build outputs",
        snapshot_id,
        pipeline_id,
        versions.len(),
        inputs.len(),
        outputs.len()
    );

    let mut builder = VersionsDB::builder(snapshot_id);
    for row in resources {
        builder = builder.resource(row.name, row.id);
    }
    for row in jobs {
        builder = builder.job(row.name, row.id);
    }

    Ok(builder
        .versions(versions.into_iter().map(Into::into))
        .build_inputs(inputs.into_iter().map(Into::into))
        .build_outputs(outputs.into_iter().map(Into::into))
        .build())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct NamedRow {
    id: i64,
    name: String,
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: i64,
    resource_id: i64,
    check_order: i64,
    enabled: bool,
}

impl From<VersionRow> for ResourceVersion {
    fn from(row: VersionRow) -> Self {
        ResourceVersion::new(row.resource_id, row.id, row.check_order).with_enabled(row.enabled)
    }
}

#[derive(sqlx::FromRow)]
struct BuildInputRow {
    job_id: i64,
    build_id: i64,
    name: String,
    resource_id: i64,
    version_id: i64,
}

impl From<BuildInputRow> for BuildInput {
    fn from(row: BuildInputRow) -> Self {
        BuildInput {
            job_id: row.job_id,
            build_id: row.build_id,
            input_name: row.name,
            resource_id: row.resource_id,
            version_id: row.version_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BuildOutputRow {
    job_id: i64,
    build_id: i64,
    resource_id: i64,
    version_id: i64,
}

impl From<BuildOutputRow> for BuildOutput {
    fn from(row: BuildOutputRow) -> Self {
        BuildOutput {
            job_id: row.job_id,
            build_id: row.build_id,
            resource_id: row.resource_id,
            version_id: row.version_id,
        }
    }
}
