//! Input Mapper Service
//!
//! Resolves a job's next build inputs against a versions snapshot and keeps
//! the job's pending inputs in step with the result.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use conveyor_core::domain::job::{JobConfig, JobId, JobInputConfig};
use conveyor_core::domain::mapping::{InputMapping, InputVersion, PendingInputs};
use conveyor_core::domain::resource::ResourceId;
use tracing::{debug, info};

use crate::algorithm::{
    DEFAULT_MAX_ITERATIONS, InputCandidates, ResolvedVersion, Resolver, ResolverInput,
    VersionsDB, candidates,
};
use crate::error::{ConfigurationError, Result};
use crate::repository::JobRepository;

/// What happened to a job's pending inputs after a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingOutcome {
    /// No satisfying assignment; the stored pending inputs were left alone
    Unsatisfiable,
    /// The stored pending inputs already match; nothing was written
    Unchanged,
    /// New pending inputs were written
    Saved,
    /// The stored pending inputs came from a newer snapshot; result discarded
    Stale,
}

/// A job input with its names resolved against a snapshot
struct PreparedInput<'a> {
    config: &'a JobInputConfig,
    resource_id: ResourceId,
    passed: BTreeSet<JobId>,
}

/// Computes and persists next build inputs
#[derive(Debug, Clone)]
pub struct InputMapper {
    max_iterations: usize,
}

impl Default for InputMapper {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl InputMapper {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    /// Resolves the job's next build inputs without persisting them
    ///
    /// Returns one mapping per fan-out version for a job with an `every`
    /// input that has unbuilt versions, a single latest-version mapping
    /// otherwise, and `None` when the inputs can't be satisfied.
    pub fn compute(
        &self,
        db: &VersionsDB,
        job: &JobConfig,
    ) -> std::result::Result<Option<Vec<InputMapping>>, ConfigurationError> {
        let prepared = prepare(db, job)?;
        let resolver = Resolver::new(db).with_max_iterations(self.max_iterations);

        let inputs: Vec<ResolverInput> = prepared
            .iter()
            .map(|input| ResolverInput {
                candidates: InputCandidates {
                    input_name: input.config.name.clone(),
                    resource_id: input.resource_id,
                    versions: candidates(db, input.resource_id, input.config.pinned_version),
                },
                passed: input.passed.clone(),
            })
            .collect();

        if let Some(position) = prepared.iter().position(|input| input.config.every) {
            let every = &prepared[position];

            let mut mappings = Vec::new();
            for version in inputs[position].candidates.versions.iter().rev() {
                if db.input_used(job.id, &every.config.name, every.resource_id, version.version_id) {
                    continue;
                }

                let mut fixed = inputs.clone();
                fixed[position].candidates.versions = vec![*version];

                if let Some(resolved) = resolver.resolve(&fixed) {
                    mappings.push(to_mapping(db, job, resolved));
                }
            }

            if !mappings.is_empty() {
                debug!(
                    "Job {} fans out over {} version(s) of input '{}'",
                    job.name,
                    mappings.len(),
                    every.config.name
                );
                return Ok(Some(mappings));
            }
        }

        Ok(resolver
            .resolve(&inputs)
            .map(|resolved| vec![to_mapping(db, job, resolved)]))
    }

    /// Resolves the job's next build inputs and stores them as pending
    pub async fn save_next_input_mapping(
        &self,
        jobs: &dyn JobRepository,
        db: &VersionsDB,
        job: &JobConfig,
    ) -> Result<MappingOutcome> {
        let Some(mappings) = self.compute(db, job)? else {
            debug!("Job {} has no satisfiable inputs", job.name);
            return Ok(MappingOutcome::Unsatisfiable);
        };

        if let Some(stored) = jobs.load_pending(job.id).await? {
            if stored.snapshot_id > db.snapshot_id() {
                debug!(
                    "Job {} inputs from snapshot {} discarded, snapshot {} is stored",
                    job.name,
                    db.snapshot_id(),
                    stored.snapshot_id
                );
                return Ok(MappingOutcome::Stale);
            }

            if stored.same_mappings(&mappings) {
                debug!("Job {} inputs unchanged", job.name);
                return Ok(MappingOutcome::Unchanged);
            }
        }

        let pending = PendingInputs {
            job_id: job.id,
            snapshot_id: db.snapshot_id(),
            mappings,
            resolved_at: Utc::now(),
        };

        if !jobs.save_pending(&pending).await? {
            debug!("Job {} inputs lost to a newer snapshot", job.name);
            return Ok(MappingOutcome::Stale);
        }

        info!(
            "Job {} has {} pending input mapping(s) from snapshot {}",
            job.name,
            pending.mappings.len(),
            pending.snapshot_id
        );
        Ok(MappingOutcome::Saved)
    }
}

// ===== Helper Functions =====

/// Checks the job's input declarations against the snapshot
fn prepare<'a>(
    db: &VersionsDB,
    job: &'a JobConfig,
) -> std::result::Result<Vec<PreparedInput<'a>>, ConfigurationError> {
    let mut names = HashSet::new();
    let mut prepared = Vec::with_capacity(job.inputs.len());

    for input in &job.inputs {
        if !names.insert(input.name.as_str()) {
            return Err(ConfigurationError::DuplicateInput {
                input: input.name.clone(),
            });
        }

        let resource_id =
            db.resource_id(&input.resource)
                .ok_or_else(|| ConfigurationError::UnknownResource {
                    input: input.name.clone(),
                    resource: input.resource.clone(),
                })?;

        let passed = input
            .passed
            .iter()
            .map(|job_name| {
                db.job_id(job_name)
                    .ok_or_else(|| ConfigurationError::UnknownPassedJob {
                        input: input.name.clone(),
                        job: job_name.clone(),
                    })
            })
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        if let Some(version_id) = input.pinned_version {
            if input.every {
                return Err(ConfigurationError::PinnedEveryVersion {
                    input: input.name.clone(),
                });
            }
            if db.version(resource_id, version_id).is_none() {
                return Err(ConfigurationError::PinnedVersionNotFound {
                    input: input.name.clone(),
                    resource: input.resource.clone(),
                    version_id,
                });
            }
        }

        prepared.push(PreparedInput {
            config: input,
            resource_id,
            passed,
        });
    }

    let every: Vec<String> = job
        .inputs
        .iter()
        .filter(|input| input.every)
        .map(|input| input.name.clone())
        .collect();
    if every.len() > 1 {
        return Err(ConfigurationError::MultipleEveryVersionInputs { inputs: every });
    }

    Ok(prepared)
}

fn to_mapping(db: &VersionsDB, job: &JobConfig, resolved: Vec<ResolvedVersion>) -> InputMapping {
    resolved
        .into_iter()
        .map(|resolved| {
            let version = resolved.version;
            let first_occurrence = !db.input_used(
                job.id,
                &resolved.input_name,
                version.resource_id,
                version.version_id,
            );
            (
                resolved.input_name,
                InputVersion {
                    resource_id: version.resource_id,
                    version_id: version.version_id,
                    first_occurrence,
                },
            )
        })
        .collect()
}
