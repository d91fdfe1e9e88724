//! In-memory repositories
//!
//! Implements every repository trait over a mutex-guarded state. Used by the
//! scheduler's tests and by embedders that don't need durable storage.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use conveyor_core::domain::build::{BuildId, BuildInput, BuildOutput, BuildStatus};
use conveyor_core::domain::job::JobId;
use conveyor_core::domain::mapping::{InputMapping, PendingInputs, SnapshotId};
use conveyor_core::domain::pipeline::{PipelineConfig, PipelineId};
use conveyor_core::domain::resource::{ResourceId, ResourceVersion, VersionId};
use conveyor_core::dto::build::OutputVersion;
use conveyor_core::dto::job::JobSchedulingStatus;

use super::{
    BuildRepository, JobRepository, PipelineRepository, RepositoryError, Result,
    VersionsRepository,
};
use crate::algorithm::VersionsDB;

/// A build as the in-memory store keeps it
#[derive(Debug, Clone)]
pub struct StoredBuild {
    pub job_id: JobId,
    pub status: BuildStatus,
    pub manually_triggered: bool,
    pub inputs: Vec<BuildInput>,
}

#[derive(Debug, Default)]
struct State {
    pipelines: Vec<PipelineConfig>,
    resources: HashMap<PipelineId, HashMap<String, ResourceId>>,
    versions: BTreeMap<(ResourceId, VersionId), ResourceVersion>,
    builds: BTreeMap<BuildId, StoredBuild>,
    outputs: Vec<BuildOutput>,
    pending: HashMap<JobId, PendingInputs>,
    manual_triggers: HashSet<JobId>,
    config_errors: HashMap<JobId, String>,
    last_snapshot: SnapshotId,
    last_build: BuildId,
    pending_writes: usize,
    config_error_writes: usize,
}

impl State {
    fn pipeline_of_job(&self, job_id: JobId) -> Option<&PipelineConfig> {
        self.pipelines
            .iter()
            .find(|pipeline| pipeline.jobs.iter().any(|job| job.id == job_id))
    }
}

/// Repository backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a pipeline configuration
    pub fn put_pipeline(&self, pipeline: PipelineConfig) {
        let mut state = self.state();
        state.pipelines.retain(|existing| existing.id != pipeline.id);
        state.pipelines.push(pipeline);
        state.pipelines.sort_by_key(|pipeline| pipeline.id);
    }

    /// Declares a resource of a pipeline
    pub fn add_resource(&self, pipeline_id: PipelineId, name: impl Into<String>, id: ResourceId) {
        self.state()
            .resources
            .entry(pipeline_id)
            .or_default()
            .insert(name.into(), id);
    }

    /// Records a discovered version, replacing one with the same ids
    pub fn add_version(&self, version: ResourceVersion) {
        self.state()
            .versions
            .insert((version.resource_id, version.version_id), version);
    }

    /// Enables or disables a known version
    pub fn set_version_enabled(
        &self,
        resource_id: ResourceId,
        version_id: VersionId,
        enabled: bool,
    ) -> Result<()> {
        let mut state = self.state();
        let version = state
            .versions
            .get_mut(&(resource_id, version_id))
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("version {} of resource {}", version_id, resource_id))
            })?;
        version.enabled = enabled;
        Ok(())
    }

    /// Builds of a job, oldest first
    pub fn builds(&self, job_id: JobId) -> Vec<(BuildId, StoredBuild)> {
        self.state()
            .builds
            .iter()
            .filter(|(_, build)| build.job_id == job_id)
            .map(|(id, build)| (*id, build.clone()))
            .collect()
    }

    /// Number of `save_pending` calls that wrote
    pub fn pending_writes(&self) -> usize {
        self.state().pending_writes
    }

    /// Number of `set_config_error` calls that changed the stored error
    pub fn config_error_writes(&self) -> usize {
        self.state().config_error_writes
    }

    /// Scheduling status of a job
    pub fn status(&self, job_id: JobId) -> JobSchedulingStatus {
        let state = self.state();
        JobSchedulingStatus::new(
            job_id,
            state.pending.get(&job_id).cloned(),
            state.config_errors.get(&job_id).cloned(),
            state.manual_triggers.contains(&job_id),
        )
    }
}

#[async_trait]
impl PipelineRepository for InMemoryRepository {
    async fn list_pipelines(&self) -> Result<Vec<PipelineConfig>> {
        Ok(self.state().pipelines.clone())
    }
}

#[async_trait]
impl VersionsRepository for InMemoryRepository {
    async fn load_versions_db(&self, pipeline_id: PipelineId) -> Result<VersionsDB> {
        let mut state = self.state();
        state.last_snapshot += 1;

        let pipeline = state
            .pipelines
            .iter()
            .find(|pipeline| pipeline.id == pipeline_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("pipeline {}", pipeline_id)))?;
        let job_ids: HashSet<JobId> = pipeline.jobs.iter().map(|job| job.id).collect();

        let mut builder = VersionsDB::builder(state.last_snapshot);
        for job in &pipeline.jobs {
            builder = builder.job(job.name.clone(), job.id);
        }

        let resources = state.resources.get(&pipeline_id).cloned().unwrap_or_default();
        let resource_ids: HashSet<ResourceId> = resources.values().copied().collect();
        for (name, id) in resources {
            builder = builder.resource(name, id);
        }

        let versions = state
            .versions
            .values()
            .filter(|version| resource_ids.contains(&version.resource_id))
            .copied();

        let inputs = state
            .builds
            .values()
            .filter(|build| job_ids.contains(&build.job_id))
            .flat_map(|build| build.inputs.iter().cloned());

        let outputs = state
            .outputs
            .iter()
            .filter(|output| job_ids.contains(&output.job_id))
            .copied();

        Ok(builder
            .versions(versions)
            .build_inputs(inputs)
            .build_outputs(outputs)
            .build())
    }
}

#[async_trait]
impl JobRepository for InMemoryRepository {
    async fn load_pending(&self, job_id: JobId) -> Result<Option<PendingInputs>> {
        Ok(self.state().pending.get(&job_id).cloned())
    }

    async fn save_pending(&self, pending: &PendingInputs) -> Result<bool> {
        let mut state = self.state();

        if let Some(existing) = state.pending.get(&pending.job_id) {
            if existing.snapshot_id > pending.snapshot_id {
                return Ok(false);
            }
        }

        state.pending.insert(pending.job_id, pending.clone());
        state.pending_writes += 1;
        Ok(true)
    }

    async fn request_manual_trigger(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state();
        if state.pipeline_of_job(job_id).is_none() {
            return Err(RepositoryError::NotFound(format!("job {}", job_id)));
        }
        state.manual_triggers.insert(job_id);
        Ok(())
    }

    async fn manual_trigger_requested(&self, job_id: JobId) -> Result<bool> {
        Ok(self.state().manual_triggers.contains(&job_id))
    }

    async fn take_manual_trigger(&self, job_id: JobId) -> Result<bool> {
        Ok(self.state().manual_triggers.remove(&job_id))
    }

    async fn set_config_error(&self, job_id: JobId, error: Option<String>) -> Result<()> {
        let mut state = self.state();
        if state.config_errors.get(&job_id) == error.as_ref() {
            return Ok(());
        }
        match error {
            Some(error) => state.config_errors.insert(job_id, error),
            None => state.config_errors.remove(&job_id),
        };
        state.config_error_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl BuildRepository for InMemoryRepository {
    async fn create_build(
        &self,
        job_id: JobId,
        mapping: &InputMapping,
        manually_triggered: bool,
    ) -> Result<BuildId> {
        let mut state = self.state();
        state.last_build += 1;
        let build_id = state.last_build;

        let inputs = mapping
            .iter()
            .map(|(name, version)| BuildInput {
                job_id,
                build_id,
                input_name: name.clone(),
                resource_id: version.resource_id,
                version_id: version.version_id,
            })
            .collect();

        state.builds.insert(
            build_id,
            StoredBuild {
                job_id,
                status: BuildStatus::Pending,
                manually_triggered,
                inputs,
            },
        );

        if let Some(pending) = state.pending.get_mut(&job_id) {
            pending.mappings.retain(|pending| pending != mapping);
        }

        Ok(build_id)
    }

    async fn finish_build(
        &self,
        build_id: BuildId,
        status: BuildStatus,
        outputs: &[OutputVersion],
    ) -> Result<()> {
        let mut state = self.state();

        let build = state
            .builds
            .get_mut(&build_id)
            .filter(|build| !build.status.is_finished())
            .ok_or_else(|| RepositoryError::NotFound(format!("unfinished build {}", build_id)))?;
        build.status = status;

        if status != BuildStatus::Succeeded {
            return Ok(());
        }

        let job_id = build.job_id;
        let mut passed_on: Vec<BuildOutput> = build
            .inputs
            .iter()
            .map(|input| BuildOutput {
                job_id,
                build_id,
                resource_id: input.resource_id,
                version_id: input.version_id,
            })
            .collect();
        passed_on.extend(outputs.iter().map(|output| BuildOutput {
            job_id,
            build_id,
            resource_id: output.resource_id,
            version_id: output.version_id,
        }));

        state.outputs.extend(passed_on);
        Ok(())
    }
}
