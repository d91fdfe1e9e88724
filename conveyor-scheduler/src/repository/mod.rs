//! Repository Module
//!
//! Storage boundary of the scheduler. The traits are what the scheduling loop
//! depends on; Postgres backs them in production and an in-memory store backs
//! them in tests and embedded use.
//!
//! The Postgres modules hold plain query functions over a pool, one module per
//! table family, and [`PgRepository`] wires them to the traits.

pub mod build;
pub mod job;
pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod versions;

// Re-export for convenience
pub use build as build_repository;
pub use job as job_repository;
pub use pipeline as pipeline_repository;
pub use versions as versions_repository;

pub use memory::InMemoryRepository;
pub use postgres::PgRepository;

use async_trait::async_trait;
use conveyor_core::domain::build::{BuildId, BuildStatus};
use conveyor_core::domain::job::JobId;
use conveyor_core::domain::mapping::{InputMapping, PendingInputs};
use conveyor_core::domain::pipeline::{PipelineConfig, PipelineId};
use conveyor_core::dto::build::OutputVersion;
use thiserror::Error;

use crate::algorithm::VersionsDB;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Source of pipeline and job configuration
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    /// Lists every pipeline with its job declarations
    async fn list_pipelines(&self) -> Result<Vec<PipelineConfig>>;
}

/// Source of versions snapshots
#[async_trait]
pub trait VersionsRepository: Send + Sync {
    /// Loads a fresh snapshot of a pipeline's version history
    ///
    /// Every load gets a snapshot id greater than any earlier load's.
    async fn load_versions_db(&self, pipeline_id: PipelineId) -> Result<VersionsDB>;
}

/// Per-job scheduling state
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Loads the job's pending "next build inputs"
    async fn load_pending(&self, job_id: JobId) -> Result<Option<PendingInputs>>;

    /// Replaces the job's pending inputs
    ///
    /// Returns `false` without writing when the stored inputs were resolved
    /// from a newer snapshot.
    async fn save_pending(&self, pending: &PendingInputs) -> Result<bool>;

    /// Records a manual trigger request for the job
    async fn request_manual_trigger(&self, job_id: JobId) -> Result<()>;

    /// Whether a manual trigger is waiting for the job
    async fn manual_trigger_requested(&self, job_id: JobId) -> Result<bool>;

    /// Clears the job's manual trigger request, returning whether one was set
    async fn take_manual_trigger(&self, job_id: JobId) -> Result<bool>;

    /// Stores or clears the job's configuration error
    async fn set_config_error(&self, job_id: JobId, error: Option<String>) -> Result<()>;
}

/// Build history
#[async_trait]
pub trait BuildRepository: Send + Sync {
    /// Creates a pending build from a resolved mapping
    ///
    /// The mapping becomes the build's immutable inputs and is removed from the
    /// job's pending inputs in the same step.
    async fn create_build(
        &self,
        job_id: JobId,
        mapping: &InputMapping,
        manually_triggered: bool,
    ) -> Result<BuildId>;

    /// Records a build's final status
    ///
    /// A succeeded build's inputs and `outputs` become its passed-on versions.
    async fn finish_build(
        &self,
        build_id: BuildId,
        status: BuildStatus,
        outputs: &[OutputVersion],
    ) -> Result<()>;
}
