//! Resolved input mappings
//!
//! An [`InputMapping`] is the scheduler's answer to "which version of each input
//! should the next build of this job run against". It is persisted per job as
//! [`PendingInputs`] until a build consumes it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{JobConfig, JobId};
use super::resource::{ResourceId, VersionId};

/// Monotonic identifier of one versions snapshot load
pub type SnapshotId = i64;

/// The version chosen for one input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputVersion {
    pub resource_id: ResourceId,
    pub version_id: VersionId,

    /// True when no build of the job has consumed this version under this input
    pub first_occurrence: bool,
}

/// One version per input name, ordered by input name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputMapping(BTreeMap<String, InputVersion>);

impl InputMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, input_name: impl Into<String>, version: InputVersion) {
        self.0.insert(input_name.into(), version);
    }

    pub fn get(&self, input_name: &str) -> Option<&InputVersion> {
        self.0.get(input_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InputVersion)> {
        self.0.iter()
    }

    /// Whether this mapping should start a build without a manual request
    ///
    /// True when any input declared with `trigger` resolved to a version it
    /// has never been built with.
    pub fn should_trigger(&self, job: &JobConfig) -> bool {
        job.inputs.iter().filter(|input| input.trigger).any(|input| {
            self.0
                .get(&input.name)
                .is_some_and(|version| version.first_occurrence)
        })
    }
}

impl FromIterator<(String, InputVersion)> for InputMapping {
    fn from_iter<T: IntoIterator<Item = (String, InputVersion)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The pending "next build inputs" of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInputs {
    pub job_id: JobId,

    /// Snapshot the mappings were resolved from
    pub snapshot_id: SnapshotId,

    /// One mapping, or one per fan-out tuple ordered oldest to newest
    pub mappings: Vec<InputMapping>,

    pub resolved_at: DateTime<Utc>,
}

impl PendingInputs {
    /// Whether the stored mappings are the same as `mappings`
    ///
    /// Ignores snapshot and timestamp so unchanged resolutions are not rewritten.
    pub fn same_mappings(&self, mappings: &[InputMapping]) -> bool {
        self.mappings == mappings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobInputConfig;

    fn version(version_id: VersionId, first_occurrence: bool) -> InputVersion {
        InputVersion {
            resource_id: 1,
            version_id,
            first_occurrence,
        }
    }

    #[test]
    fn test_should_trigger_only_on_trigger_inputs() {
        let job = JobConfig::new(1, "deploy")
            .with_input(JobInputConfig::new("repo", "repo").trigger())
            .with_input(JobInputConfig::new("config", "config"));

        let mut mapping = InputMapping::new();
        mapping.insert("repo", version(1, false));
        mapping.insert("config", version(7, true));
        assert!(!mapping.should_trigger(&job));

        mapping.insert("repo", version(2, true));
        assert!(mapping.should_trigger(&job));
    }

    #[test]
    fn test_mapping_serializes_as_object() {
        let mut mapping = InputMapping::new();
        mapping.insert("repo", version(3, true));

        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["repo"]["version_id"], 3);
        assert_eq!(json["repo"]["first_occurrence"], true);

        let back: InputMapping = serde_json::from_value(json).unwrap();
        assert_eq!(back, mapping);
    }
}
