//! Scheduler error types

use conveyor_core::domain::resource::VersionId;
use thiserror::Error;

use crate::repository::RepositoryError;
use crate::service::dispatch::DispatchError;

/// Result type alias for scheduling operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// A job's input declarations can't be resolved against its pipeline
///
/// Stored on the job so operators can see why it never builds. The job is
/// skipped until its configuration resolves cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("input '{input}' references unknown resource '{resource}'")]
    UnknownResource { input: String, resource: String },

    #[error("input '{input}' is constrained by unknown job '{job}'")]
    UnknownPassedJob { input: String, job: String },

    #[error("input '{input}' is pinned to version {version_id}, which resource '{resource}' does not have")]
    PinnedVersionNotFound {
        input: String,
        resource: String,
        version_id: VersionId,
    },

    #[error("input '{input}' cannot be pinned and build every version")]
    PinnedEveryVersion { input: String },

    #[error("only one input may build every version, found: {}", inputs.join(", "))]
    MultipleEveryVersionInputs { inputs: Vec<String> },

    #[error("input name '{input}' is declared more than once")]
    DuplicateInput { input: String },
}

/// Errors that abort scheduling of one job for the current tick
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid job configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}
