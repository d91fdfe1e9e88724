//! Postgres-backed repositories

use async_trait::async_trait;
use conveyor_core::domain::build::{BuildId, BuildStatus};
use conveyor_core::domain::job::JobId;
use conveyor_core::domain::mapping::{InputMapping, PendingInputs};
use conveyor_core::domain::pipeline::{PipelineConfig, PipelineId};
use conveyor_core::dto::build::OutputVersion;
use sqlx::PgPool;

use super::{
    BuildRepository, JobRepository, PipelineRepository, Result, VersionsRepository,
    build_repository, job_repository, pipeline_repository, versions_repository,
};
use crate::algorithm::VersionsDB;

/// All repository traits over one connection pool
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineRepository for PgRepository {
    async fn list_pipelines(&self) -> Result<Vec<PipelineConfig>> {
        pipeline_repository::list_all(&self.pool).await
    }
}

#[async_trait]
impl VersionsRepository for PgRepository {
    async fn load_versions_db(&self, pipeline_id: PipelineId) -> Result<VersionsDB> {
        versions_repository::load_versions_db(&self.pool, pipeline_id).await
    }
}

#[async_trait]
impl JobRepository for PgRepository {
    async fn load_pending(&self, job_id: JobId) -> Result<Option<PendingInputs>> {
        job_repository::find_pending(&self.pool, job_id).await
    }

    async fn save_pending(&self, pending: &PendingInputs) -> Result<bool> {
        job_repository::save_pending(&self.pool, pending).await
    }

    async fn request_manual_trigger(&self, job_id: JobId) -> Result<()> {
        job_repository::request_manual_trigger(&self.pool, job_id).await
    }

    async fn manual_trigger_requested(&self, job_id: JobId) -> Result<bool> {
        job_repository::manual_trigger_requested(&self.pool, job_id).await
    }

    async fn take_manual_trigger(&self, job_id: JobId) -> Result<bool> {
        job_repository::take_manual_trigger(&self.pool, job_id).await
    }

    async fn set_config_error(&self, job_id: JobId, error: Option<String>) -> Result<()> {
        job_repository::set_config_error(&self.pool, job_id, error).await
    }
}

#[async_trait]
impl BuildRepository for PgRepository {
    async fn create_build(
        &self,
        job_id: JobId,
        mapping: &InputMapping,
        manually_triggered: bool,
    ) -> Result<BuildId> {
        build_repository::create(&self.pool, job_id, mapping, manually_triggered).await
    }

    async fn finish_build(
        &self,
        build_id: BuildId,
        status: BuildStatus,
        outputs: &[OutputVersion],
    ) -> Result<()> {
        build_repository::finish(&self.pool, build_id, status, outputs).await
    }
}
