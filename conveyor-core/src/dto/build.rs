//! Build DTOs exchanged with the build executor

use serde::{Deserialize, Serialize};

use crate::domain::build::{BuildId, BuildStatus};
use crate::domain::job::{JobConfig, JobId};
use crate::domain::mapping::InputMapping;
use crate::domain::pipeline::PipelineId;
use crate::domain::resource::{ResourceId, VersionId};

/// A finalized build handed to the execution boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub build_id: BuildId,
    pub pipeline_id: PipelineId,
    pub job_id: JobId,
    pub job_name: String,
    pub inputs: Vec<BuildRequestInput>,
    pub platform: Option<String>,
    pub tags: Vec<String>,
    pub manually_triggered: bool,
}

impl BuildRequest {
    /// Builds the request for a created build of `job` from its resolved mapping
    pub fn new(
        build_id: BuildId,
        pipeline_id: PipelineId,
        job: &JobConfig,
        mapping: &InputMapping,
        manually_triggered: bool,
    ) -> Self {
        let inputs = mapping
            .iter()
            .map(|(name, version)| BuildRequestInput {
                name: name.clone(),
                resource_id: version.resource_id,
                version_id: version.version_id,
            })
            .collect();

        Self {
            build_id,
            pipeline_id,
            job_id: job.id,
            job_name: job.name.clone(),
            inputs,
            platform: job.platform.clone(),
            tags: job.tags.clone(),
            manually_triggered,
        }
    }
}

/// One resolved input of a build request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequestInput {
    pub name: String,
    pub resource_id: ResourceId,
    pub version_id: VersionId,
}

/// Final status reported by the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishBuild {
    pub status: BuildStatus,

    /// Versions the build produced, in addition to its inputs
    #[serde(default)]
    pub outputs: Vec<OutputVersion>,
}

/// A version produced by a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputVersion {
    pub resource_id: ResourceId,
    pub version_id: VersionId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobInputConfig;
    use crate::domain::mapping::InputVersion;

    #[test]
    fn test_request_carries_mapping_and_constraints() {
        let mut job = JobConfig::new(4, "integration")
            .with_input(JobInputConfig::new("repo", "repo"))
            .with_input(JobInputConfig::new("image", "image"));
        job.platform = Some("linux".to_string());
        job.tags = vec!["gpu".to_string()];

        let mut mapping = InputMapping::new();
        mapping.insert(
            "repo",
            InputVersion {
                resource_id: 1,
                version_id: 10,
                first_occurrence: true,
            },
        );
        mapping.insert(
            "image",
            InputVersion {
                resource_id: 2,
                version_id: 20,
                first_occurrence: false,
            },
        );

        let request = BuildRequest::new(99, 3, &job, &mapping, false);

        assert_eq!(request.build_id, 99);
        assert_eq!(request.job_name, "integration");
        assert_eq!(request.platform.as_deref(), Some("linux"));
        assert_eq!(request.tags, vec!["gpu"]);
        // inputs follow the mapping's name order
        assert_eq!(request.inputs[0].name, "image");
        assert_eq!(request.inputs[1].version_id, 10);
    }
}
