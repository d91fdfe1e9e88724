//! Pipeline domain types

use serde::{Deserialize, Serialize};

use super::job::JobConfig;

/// Stable identifier of a pipeline
pub type PipelineId = i64;

/// Pipeline definition as seen by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub id: PipelineId,
    pub name: String,
    #[serde(default)]
    pub paused: bool,
    pub jobs: Vec<JobConfig>,
}

impl PipelineConfig {
    pub fn new(id: PipelineId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            paused: false,
            jobs: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: JobConfig) -> Self {
        self.jobs.push(job);
        self
    }
}
