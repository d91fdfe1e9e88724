//! Pipeline Repository
//!
//! Reads pipelines and their job declarations. Job inputs are stored as the
//! JSON document the external configuration parser produced.

use std::collections::HashMap;

use conveyor_core::domain::job::{JobConfig, JobId, JobInputConfig};
use conveyor_core::domain::pipeline::{PipelineConfig, PipelineId};
use serde::Deserialize;
use sqlx::PgPool;

use super::{RepositoryError, Result, job as job_repository};

/// List all pipelines with their jobs, ordered by id
///
/// A job whose stored configuration can't be decoded is left out and gets the
/// decode failure as its configuration error.
pub async fn list_all(pool: &PgPool) -> Result<Vec<PipelineConfig>> {
    let pipelines = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, name, paused
        FROM pipelines
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let jobs = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, pipeline_id, name, config
        FROM jobs
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let (mut jobs_by_pipeline, malformed) = decode_jobs(jobs);
    for (job_id, error) in malformed {
        tracing::warn!("Skipping job {}: {}", job_id, error);
        job_repository::set_config_error(pool, job_id, Some(error)).await?;
    }

    Ok(pipelines
        .into_iter()
        .map(|row| PipelineConfig {
            jobs: jobs_by_pipeline.remove(&row.id).unwrap_or_default(),
            id: row.id,
            name: row.name,
            paused: row.paused,
        })
        .collect())
}

/// Groups decodable jobs by pipeline and collects the ones that failed
fn decode_jobs(rows: Vec<JobRow>) -> (HashMap<PipelineId, Vec<JobConfig>>, Vec<(JobId, String)>) {
    let mut jobs_by_pipeline: HashMap<PipelineId, Vec<JobConfig>> = HashMap::new();
    let mut malformed = Vec::new();

    for row in rows {
        let (job_id, pipeline_id) = (row.id, row.pipeline_id);
        match JobConfig::try_from(row) {
            Ok(job) => jobs_by_pipeline.entry(pipeline_id).or_default().push(job),
            Err(e) => malformed.push((job_id, format!("invalid job configuration: {}", e))),
        }
    }

    (jobs_by_pipeline, malformed)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: i64,
    name: String,
    paused: bool,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    pipeline_id: i64,
    name: String,
    config: serde_json::Value,
}

/// The stored part of a job declaration; id and name live in their own columns
#[derive(Deserialize)]
struct JobDocument {
    #[serde(default)]
    inputs: Vec<JobInputConfig>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl TryFrom<JobRow> for JobConfig {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> std::result::Result<Self, Self::Error> {
        let document: JobDocument = serde_json::from_value(row.config)?;

        Ok(JobConfig {
            id: row.id,
            name: row.name,
            inputs: document.inputs,
            platform: document.platform,
            tags: document.tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_row_conversion() {
        let row = JobRow {
            id: 3,
            pipeline_id: 1,
            name: "deploy".to_string(),
            config: serde_json::json!({
                "inputs": [
                    { "name": "repo", "resource": "git", "passed": ["unit"], "trigger": true }
                ],
                "tags": ["prod"]
            }),
        };

        let job = JobConfig::try_from(row).unwrap();
        assert_eq!(job.id, 3);
        assert_eq!(job.name, "deploy");
        assert_eq!(job.inputs[0].passed, vec!["unit"]);
        assert!(job.inputs[0].trigger);
        assert_eq!(job.platform, None);
        assert_eq!(job.tags, vec!["prod"]);
    }

    #[test]
    fn test_job_row_with_malformed_config() {
        let row = JobRow {
            id: 3,
            pipeline_id: 1,
            name: "deploy".to_string(),
            config: serde_json::json!({ "inputs": "not-a-list" }),
        };

        assert!(matches!(
            JobConfig::try_from(row),
            Err(RepositoryError::Serialization(_))
        ));
    }

    #[test]
    fn test_malformed_job_does_not_hide_its_siblings() {
        let row = |id, pipeline_id, config| JobRow {
            id,
            pipeline_id,
            name: format!("job-{}", id),
            config,
        };
        let rows = vec![
            row(1, 1, serde_json::json!({ "inputs": [] })),
            row(2, 1, serde_json::json!({ "inputs": 42 })),
            row(3, 1, serde_json::json!({})),
            row(4, 2, serde_json::json!({ "tags": ["nightly"] })),
        ];

        let (jobs, malformed) = decode_jobs(rows);

        let ids: Vec<JobId> = jobs[&1].iter().map(|job| job.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(jobs[&2][0].tags, vec!["nightly"]);
        assert_eq!(malformed.len(), 1);
        assert_eq!(malformed[0].0, 2);
        assert!(malformed[0].1.starts_with("invalid job configuration"));
    }
}
