//! Job configuration types
//!
//! Jobs are declared by the pipeline configuration, which is parsed and
//! validated outside the scheduler. The scheduler only reads these structures.

use serde::{Deserialize, Serialize};

use super::resource::VersionId;

/// Stable identifier of a job, unique within a pipeline
pub type JobId = i64;

/// A job and the inputs its builds consume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: JobId,
    pub name: String,
    pub inputs: Vec<JobInputConfig>,

    /// Platform a worker must provide to run this job's builds
    #[serde(default)]
    pub platform: Option<String>,

    /// Worker tags required by this job's builds
    #[serde(default)]
    pub tags: Vec<String>,
}

impl JobConfig {
    /// Creates a job with no inputs and no placement constraints
    pub fn new(id: JobId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            inputs: Vec::new(),
            platform: None,
            tags: Vec::new(),
        }
    }

    /// Adds an input declaration
    pub fn with_input(mut self, input: JobInputConfig) -> Self {
        self.inputs.push(input);
        self
    }
}

/// One declared input of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInputConfig {
    /// Name the build sees this input under
    pub name: String,

    /// Name of the resource the input draws versions from
    pub resource: String,

    /// Upstream jobs that must have jointly passed the chosen version
    #[serde(default)]
    pub passed: Vec<String>,

    /// Build every version instead of only the latest
    #[serde(default)]
    pub every: bool,

    /// Forces the input to one version, bypassing the search
    #[serde(default)]
    pub pinned_version: Option<VersionId>,

    /// Whether new versions of this input start builds automatically
    #[serde(default)]
    pub trigger: bool,
}

impl JobInputConfig {
    /// Creates an input named after its resource, with no constraints
    pub fn new(name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            passed: Vec::new(),
            every: false,
            pinned_version: None,
            trigger: false,
        }
    }

    pub fn passed<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passed = jobs.into_iter().map(Into::into).collect();
        self
    }

    pub fn every(mut self) -> Self {
        self.every = true;
        self
    }

    pub fn pinned(mut self, version_id: VersionId) -> Self {
        self.pinned_version = Some(version_id);
        self
    }

    pub fn trigger(mut self) -> Self {
        self.trigger = true;
        self
    }
}
