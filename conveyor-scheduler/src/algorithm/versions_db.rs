//! Versions snapshot
//!
//! A [`VersionsDB`] is the read model the resolver works against: every known
//! version of every resource in one pipeline, every build's recorded inputs and
//! the outputs of succeeded builds. It is built once per scheduling pass and
//! never mutated afterwards, so it can be shared by reference across all jobs
//! of the pipeline.

use std::collections::{BTreeSet, HashMap, HashSet};

use conveyor_core::domain::build::{BuildId, BuildInput, BuildOutput};
use conveyor_core::domain::job::JobId;
use conveyor_core::domain::mapping::SnapshotId;
use conveyor_core::domain::resource::{ResourceId, ResourceVersion, VersionId};

static NO_BUILDS: BTreeSet<BuildId> = BTreeSet::new();

/// Immutable point-in-time snapshot of a pipeline's version history
#[derive(Debug, Clone)]
pub struct VersionsDB {
    snapshot_id: SnapshotId,
    resource_ids: HashMap<String, ResourceId>,
    job_ids: HashMap<String, JobId>,

    /// Per resource, most recent check order first
    versions: HashMap<ResourceId, Vec<ResourceVersion>>,
    version_index: HashMap<(ResourceId, VersionId), ResourceVersion>,

    /// (job, resource, version) -> succeeded builds of the job that output it
    outputs: HashMap<(JobId, ResourceId, VersionId), BTreeSet<BuildId>>,

    /// (job, input name) -> versions any build of the job consumed under that name
    used_inputs: HashMap<(JobId, String), HashSet<(ResourceId, VersionId)>>,
}

impl VersionsDB {
    /// Starts building a snapshot identified by `snapshot_id`
    pub fn builder(snapshot_id: SnapshotId) -> VersionsDBBuilder {
        VersionsDBBuilder {
            snapshot_id,
            ..Default::default()
        }
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resource_ids.get(name).copied()
    }

    pub fn job_id(&self, name: &str) -> Option<JobId> {
        self.job_ids.get(name).copied()
    }

    /// All versions of a resource, enabled or not, most recent first
    pub fn versions(&self, resource_id: ResourceId) -> &[ResourceVersion] {
        self.versions
            .get(&resource_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn version(&self, resource_id: ResourceId, version_id: VersionId) -> Option<&ResourceVersion> {
        self.version_index.get(&(resource_id, version_id))
    }

    /// Succeeded builds of `job_id` that passed on the given version
    pub fn builds_with_output(
        &self,
        job_id: JobId,
        resource_id: ResourceId,
        version_id: VersionId,
    ) -> &BTreeSet<BuildId> {
        self.outputs
            .get(&(job_id, resource_id, version_id))
            .unwrap_or(&NO_BUILDS)
    }

    /// Whether any succeeded build of `job_id` passed on the given version
    pub fn passed_through(&self, job_id: JobId, resource_id: ResourceId, version_id: VersionId) -> bool {
        !self.builds_with_output(job_id, resource_id, version_id).is_empty()
    }

    /// Whether any build of `job_id` consumed the version under `input_name`
    pub fn input_used(
        &self,
        job_id: JobId,
        input_name: &str,
        resource_id: ResourceId,
        version_id: VersionId,
    ) -> bool {
        self.used_inputs
            .get(&(job_id, input_name.to_string()))
            .is_some_and(|used| used.contains(&(resource_id, version_id)))
    }
}

/// Accumulates storage rows into a [`VersionsDB`]
#[derive(Debug, Default)]
pub struct VersionsDBBuilder {
    snapshot_id: SnapshotId,
    resource_ids: HashMap<String, ResourceId>,
    job_ids: HashMap<String, JobId>,
    versions: Vec<ResourceVersion>,
    build_inputs: Vec<BuildInput>,
    build_outputs: Vec<BuildOutput>,
}

impl VersionsDBBuilder {
    pub fn resource(mut self, name: impl Into<String>, id: ResourceId) -> Self {
        self.resource_ids.insert(name.into(), id);
        self
    }

    pub fn job(mut self, name: impl Into<String>, id: JobId) -> Self {
        self.job_ids.insert(name.into(), id);
        self
    }

    pub fn version(mut self, version: ResourceVersion) -> Self {
        self.versions.push(version);
        self
    }

    pub fn versions(mut self, versions: impl IntoIterator<Item = ResourceVersion>) -> Self {
        self.versions.extend(versions);
        self
    }

    pub fn build_input(mut self, input: BuildInput) -> Self {
        self.build_inputs.push(input);
        self
    }

    pub fn build_inputs(mut self, inputs: impl IntoIterator<Item = BuildInput>) -> Self {
        self.build_inputs.extend(inputs);
        self
    }

    pub fn build_output(mut self, output: BuildOutput) -> Self {
        self.build_outputs.push(output);
        self
    }

    pub fn build_outputs(mut self, outputs: impl IntoIterator<Item = BuildOutput>) -> Self {
        self.build_outputs.extend(outputs);
        self
    }

    /// Freezes the accumulated rows into an indexed snapshot
    ///
    /// A version id seen twice for the same resource keeps its last row.
    pub fn build(self) -> VersionsDB {
        let mut version_index = HashMap::with_capacity(self.versions.len());
        for version in self.versions {
            version_index.insert((version.resource_id, version.version_id), version);
        }

        let mut versions: HashMap<ResourceId, Vec<ResourceVersion>> = HashMap::new();
        for version in version_index.values() {
            versions.entry(version.resource_id).or_default().push(*version);
        }
        for list in versions.values_mut() {
            list.sort_by(|a, b| {
                b.check_order
                    .cmp(&a.check_order)
                    .then(b.version_id.cmp(&a.version_id))
            });
        }

        let mut outputs: HashMap<(JobId, ResourceId, VersionId), BTreeSet<BuildId>> = HashMap::new();
        for output in self.build_outputs {
            outputs
                .entry((output.job_id, output.resource_id, output.version_id))
                .or_default()
                .insert(output.build_id);
        }

        let mut used_inputs: HashMap<(JobId, String), HashSet<(ResourceId, VersionId)>> =
            HashMap::new();
        for input in self.build_inputs {
            used_inputs
                .entry((input.job_id, input.input_name))
                .or_default()
                .insert((input.resource_id, input.version_id));
        }

        VersionsDB {
            snapshot_id: self.snapshot_id,
            resource_ids: self.resource_ids,
            job_ids: self.job_ids,
            versions,
            version_index,
            outputs,
            used_inputs,
        }
    }
}
