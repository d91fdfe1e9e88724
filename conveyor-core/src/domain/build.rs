//! Build domain types

use serde::{Deserialize, Serialize};

use super::job::JobId;
use super::resource::{ResourceId, VersionId};

/// Stable identifier of a build
pub type BuildId = i64;

/// Build lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Succeeded,
    Failed,
    Errored,
    Aborted,
}

impl BuildStatus {
    /// Whether the build has reached a final status
    pub fn is_finished(self) -> bool {
        self != BuildStatus::Pending
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Pending => write!(f, "pending"),
            BuildStatus::Succeeded => write!(f, "succeeded"),
            BuildStatus::Failed => write!(f, "failed"),
            BuildStatus::Errored => write!(f, "errored"),
            BuildStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// A version consumed by a build under a named input
///
/// Recorded when the build is created and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInput {
    pub job_id: JobId,
    pub build_id: BuildId,
    pub input_name: String,
    pub resource_id: ResourceId,
    pub version_id: VersionId,
}

/// A version a succeeded build passed on to downstream jobs
///
/// A succeeded build's inputs are recorded as implicit outputs as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildOutput {
    pub job_id: JobId,
    pub build_id: BuildId,
    pub resource_id: ResourceId,
    pub version_id: VersionId,
}
