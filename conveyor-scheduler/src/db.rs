use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Check order is the per-resource ordering key, so it must not repeat
const RESOURCE_VERSIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS resource_versions (
        id BIGSERIAL PRIMARY KEY,
        resource_id BIGINT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
        version JSONB NOT NULL,
        check_order BIGINT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        UNIQUE (resource_id, check_order)
    )
"#;

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Snapshot ids handed out to every versions load
    sqlx::query("CREATE SEQUENCE IF NOT EXISTS versions_snapshot_seq")
        .execute(pool)
        .await?;

    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            paused BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            config JSONB NOT NULL DEFAULT '{}',
            config_error TEXT,
            manual_trigger_requested BOOLEAN NOT NULL DEFAULT FALSE,
            UNIQUE (pipeline_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create resources table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            UNIQUE (pipeline_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create resource versions table
    sqlx::query(RESOURCE_VERSIONS_TABLE).execute(pool).await?;

    // Create builds table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            id BIGSERIAL PRIMARY KEY,
            job_id BIGINT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            status VARCHAR(50) NOT NULL,
            manually_triggered BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_inputs (
            build_id BIGINT NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            version_id BIGINT NOT NULL REFERENCES resource_versions(id) ON DELETE CASCADE,
            PRIMARY KEY (build_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_outputs (
            build_id BIGINT NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            version_id BIGINT NOT NULL REFERENCES resource_versions(id) ON DELETE CASCADE,
            PRIMARY KEY (build_id, version_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pending inputs table, one row per job
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_build_inputs (
            job_id BIGINT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
            snapshot_id BIGINT NOT NULL,
            mappings JSONB NOT NULL DEFAULT '[]',
            resolved_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_pipeline_id ON jobs(pipeline_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_resources_pipeline_id ON resources(pipeline_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_resource_versions_order ON resource_versions(resource_id, check_order DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_builds_job_id ON builds(job_id, status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_build_outputs_version ON build_outputs(version_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_order_is_unique_per_resource() {
        let ddl: String = RESOURCE_VERSIONS_TABLE.split_whitespace().collect::<Vec<_>>().join(" ");
        assert!(ddl.contains("UNIQUE (resource_id, check_order)"));
    }
}
