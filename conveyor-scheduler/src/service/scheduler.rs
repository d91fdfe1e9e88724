//! Scheduler loop
//!
//! On every tick, loads each active pipeline's versions snapshot, brings every
//! job's pending inputs up to date and turns triggering mappings into builds.
//! Jobs of one pipeline are scheduled as concurrent tasks bounded by a
//! semaphore; a tick waits for all of them before the next one starts.

use std::sync::Arc;

use conveyor_core::domain::build::{BuildId, BuildStatus};
use conveyor_core::domain::job::JobConfig;
use conveyor_core::domain::mapping::InputMapping;
use conveyor_core::domain::pipeline::PipelineId;
use conveyor_core::dto::build::BuildRequest;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, error, info, warn};

use super::dispatch::BuildDispatcher;
use super::input_mapper::{InputMapper, MappingOutcome};
use crate::algorithm::VersionsDB;
use crate::config::Config;
use crate::error::{Result, SchedulerError};
use crate::repository::{BuildRepository, JobRepository, PipelineRepository, VersionsRepository};

/// Storage capabilities the scheduler works against
#[derive(Clone)]
pub struct Repositories {
    pub pipelines: Arc<dyn PipelineRepository>,
    pub versions: Arc<dyn VersionsRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub builds: Arc<dyn BuildRepository>,
}

impl Repositories {
    /// Uses one store for every capability
    pub fn shared<R>(repository: Arc<R>) -> Self
    where
        R: PipelineRepository + VersionsRepository + JobRepository + BuildRepository + 'static,
    {
        Self {
            pipelines: repository.clone(),
            versions: repository.clone(),
            jobs: repository.clone(),
            builds: repository,
        }
    }
}

/// Counters of one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub pipelines: usize,
    pub paused: usize,
    pub jobs: usize,
    pub builds: usize,
    pub failures: usize,
}

/// Per-job scheduling step, cloned into each job task
#[derive(Clone)]
struct JobScheduling {
    jobs: Arc<dyn JobRepository>,
    builds: Arc<dyn BuildRepository>,
    dispatcher: Arc<dyn BuildDispatcher>,
    mapper: InputMapper,
}

/// Periodic scheduler over every pipeline
pub struct Scheduler {
    config: Config,
    pipelines: Arc<dyn PipelineRepository>,
    versions: Arc<dyn VersionsRepository>,
    scheduling: JobScheduling,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        repositories: Repositories,
        dispatcher: Arc<dyn BuildDispatcher>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs.max(1)));
        let scheduling = JobScheduling {
            jobs: repositories.jobs,
            builds: repositories.builds,
            dispatcher,
            mapper: InputMapper::new(config.max_search_iterations),
        };

        Self {
            config,
            pipelines: repositories.pipelines,
            versions: repositories.versions,
            scheduling,
            semaphore,
        }
    }

    /// Runs ticks until the task is cancelled
    pub async fn run(&self) {
        info!(
            "Starting scheduler (interval: {:?}, max parallel jobs: {})",
            self.config.tick_interval, self.config.max_parallel_jobs
        );

        let mut interval = time::interval(self.config.tick_interval);

        loop {
            interval.tick().await;

            match self.tick_once().await {
                Ok(outcome) => {
                    if outcome.builds > 0 || outcome.failures > 0 {
                        info!(
                            "Tick scheduled {} job(s): {} build(s), {} failure(s)",
                            outcome.jobs, outcome.builds, outcome.failures
                        );
                    }
                }
                Err(e) => {
                    error!("Error during scheduling tick: {}", e);
                }
            }
        }
    }

    /// Performs a single scheduling pass over every pipeline
    pub async fn tick_once(&self) -> Result<TickOutcome> {
        let pipelines = self.pipelines.list_pipelines().await?;
        let mut outcome = TickOutcome::default();

        for pipeline in pipelines {
            if pipeline.paused {
                debug!("Pipeline {} is paused, skipping", pipeline.name);
                outcome.paused += 1;
                continue;
            }
            outcome.pipelines += 1;

            let db = match self.versions.load_versions_db(pipeline.id).await {
                Ok(db) => Arc::new(db),
                Err(e) => {
                    error!("Failed to load versions of pipeline {}: {}", pipeline.name, e);
                    outcome.failures += 1;
                    continue;
                }
            };

            let mut handles = Vec::with_capacity(pipeline.jobs.len());
            for job in pipeline.jobs {
                let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                    warn!("Scheduler semaphore closed, stopping tick");
                    break;
                };
                handles.push(self.spawn_job_task(pipeline.id, Arc::clone(&db), job, permit));
            }

            for handle in handles {
                outcome.jobs += 1;
                match handle.await {
                    Ok(Ok(builds)) => outcome.builds += builds,
                    Ok(Err(_)) => outcome.failures += 1,
                    Err(e) => {
                        warn!("Job task panicked: {}", e);
                        outcome.failures += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    fn spawn_job_task(
        &self,
        pipeline_id: PipelineId,
        db: Arc<VersionsDB>,
        job: JobConfig,
        permit: OwnedSemaphorePermit,
    ) -> tokio::task::JoinHandle<Result<usize>> {
        let scheduling = self.scheduling.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let result = scheduling.schedule_job(pipeline_id, &db, &job).await;
            if let Err(e) = &result {
                error!("Failed to schedule job {}: {}", job.name, e);
            }
            // Permit is released when the task ends
            result
        })
    }
}

impl JobScheduling {
    /// Brings one job's pending inputs up to date and dispatches what triggers
    ///
    /// Returns the number of builds dispatched.
    async fn schedule_job(
        &self,
        pipeline_id: PipelineId,
        db: &VersionsDB,
        job: &JobConfig,
    ) -> Result<usize> {
        let outcome = match self
            .mapper
            .save_next_input_mapping(self.jobs.as_ref(), db, job)
            .await
        {
            Ok(outcome) => outcome,
            Err(SchedulerError::Configuration(err)) => {
                warn!("Job {} has an invalid configuration: {}", job.name, err);
                self.jobs.set_config_error(job.id, Some(err.to_string())).await?;
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        self.jobs.set_config_error(job.id, None).await?;

        if !matches!(outcome, MappingOutcome::Saved | MappingOutcome::Unchanged) {
            return Ok(0);
        }

        let pending = match self.jobs.load_pending(job.id).await? {
            Some(pending) if !pending.mappings.is_empty() => pending,
            // Idle: a manual trigger stays requested until a mapping exists
            _ => return Ok(0),
        };

        // Cleared only once a build exists to answer it
        let mut manual = self.jobs.manual_trigger_requested(job.id).await?;
        let triggering: Vec<&InputMapping> = pending
            .mappings
            .iter()
            .filter(|mapping| mapping.should_trigger(job))
            .collect();

        if triggering.is_empty() {
            if !manual {
                return Ok(0);
            }
            // Oldest first, so `every` versions are built in order
            let Some(oldest) = pending.mappings.first() else {
                return Ok(0);
            };
            self.create_and_dispatch(pipeline_id, job, oldest, true, true).await?;
            return Ok(1);
        }

        for mapping in &triggering {
            self.create_and_dispatch(pipeline_id, job, mapping, false, manual)
                .await?;
            manual = false;
        }
        Ok(triggering.len())
    }

    /// Creates a build for `mapping` and hands it to the executor
    ///
    /// With `answers_manual`, the job's manual trigger request is cleared as
    /// soon as the build exists.
    async fn create_and_dispatch(
        &self,
        pipeline_id: PipelineId,
        job: &JobConfig,
        mapping: &InputMapping,
        manually_triggered: bool,
        answers_manual: bool,
    ) -> Result<BuildId> {
        let build_id = self
            .builds
            .create_build(job.id, mapping, manually_triggered)
            .await?;
        if answers_manual {
            self.jobs.take_manual_trigger(job.id).await?;
        }

        let request = BuildRequest::new(build_id, pipeline_id, job, mapping, manually_triggered);
        if let Err(e) = self.dispatcher.dispatch_build(&request).await {
            self.builds
                .finish_build(build_id, BuildStatus::Errored, &[])
                .await?;
            return Err(e.into());
        }

        info!(
            "Build {} of job {} dispatched{}",
            build_id,
            job.name,
            if manually_triggered { " (manual)" } else { "" }
        );
        Ok(build_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryRepository, RepositoryError};
    use crate::service::dispatch::DispatchError;
    use async_trait::async_trait;
    use conveyor_core::domain::job::JobInputConfig;
    use conveyor_core::domain::pipeline::PipelineConfig;
    use conveyor_core::domain::resource::ResourceVersion;
    use std::sync::Mutex;

    const REPO: i64 = 1;

    #[derive(Default)]
    struct RecordingDispatcher {
        requests: Mutex<Vec<BuildRequest>>,
        reject: bool,
    }

    impl RecordingDispatcher {
        fn requests(&self) -> Vec<BuildRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BuildDispatcher for RecordingDispatcher {
        async fn dispatch_build(&self, request: &BuildRequest) -> std::result::Result<(), DispatchError> {
            if self.reject {
                return Err(DispatchError::Rejected {
                    build_id: request.build_id,
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    fn setup(
        pipeline: PipelineConfig,
        reject: bool,
    ) -> (Scheduler, Arc<InMemoryRepository>, Arc<RecordingDispatcher>) {
        let repository = Arc::new(InMemoryRepository::new());
        repository.put_pipeline(pipeline);
        repository.add_resource(1, "repo", REPO);

        let dispatcher = Arc::new(RecordingDispatcher {
            reject,
            ..Default::default()
        });
        let scheduler = Scheduler::new(
            Config::default(),
            Repositories::shared(repository.clone()),
            dispatcher.clone(),
        );
        (scheduler, repository, dispatcher)
    }

    fn pipeline(job: JobConfig) -> PipelineConfig {
        PipelineConfig::new(1, "main").with_job(job)
    }

    fn triggered_job() -> JobConfig {
        JobConfig::new(10, "unit").with_input(JobInputConfig::new("repo", "repo").trigger())
    }

    fn version_of(request: &BuildRequest) -> i64 {
        request.inputs[0].version_id
    }

    #[tokio::test]
    async fn test_new_version_dispatches_once() {
        let (scheduler, repository, dispatcher) = setup(pipeline(triggered_job()), false);
        repository.add_version(ResourceVersion::new(REPO, 1, 1));

        let outcome = scheduler.tick_once().await.unwrap();
        assert_eq!(outcome.builds, 1);
        assert_eq!(outcome.failures, 0);

        let outcome = scheduler.tick_once().await.unwrap();
        assert_eq!(outcome.builds, 0);
        assert_eq!(dispatcher.requests().len(), 1);

        repository.add_version(ResourceVersion::new(REPO, 2, 2));
        scheduler.tick_once().await.unwrap();

        let versions: Vec<_> = dispatcher.requests().iter().map(version_of).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_non_trigger_input_waits_for_manual_trigger() {
        let job = JobConfig::new(10, "unit").with_input(JobInputConfig::new("repo", "repo"));
        let (scheduler, repository, dispatcher) = setup(pipeline(job), false);
        repository.add_version(ResourceVersion::new(REPO, 1, 1));

        scheduler.tick_once().await.unwrap();
        assert!(dispatcher.requests().is_empty());
        assert_eq!(
            repository.status(10).state,
            conveyor_core::dto::job::SchedulingState::Pending
        );

        repository.request_manual_trigger(10).await.unwrap();
        let outcome = scheduler.tick_once().await.unwrap();
        assert_eq!(outcome.builds, 1);

        let requests = dispatcher.requests();
        assert!(requests[0].manually_triggered);
        assert!(!repository.status(10).manual_trigger_requested);
    }

    #[tokio::test]
    async fn test_manual_trigger_on_idle_job_stays_requested() {
        let (scheduler, repository, dispatcher) = setup(pipeline(triggered_job()), false);

        repository.request_manual_trigger(10).await.unwrap();
        scheduler.tick_once().await.unwrap();

        assert!(dispatcher.requests().is_empty());
        let status = repository.status(10);
        assert_eq!(status.state, conveyor_core::dto::job::SchedulingState::Idle);
        assert!(status.manual_trigger_requested);
    }

    #[tokio::test]
    async fn test_paused_pipeline_is_skipped() {
        let mut config = pipeline(triggered_job());
        config.paused = true;
        let (scheduler, repository, dispatcher) = setup(config, false);
        repository.add_version(ResourceVersion::new(REPO, 1, 1));

        let outcome = scheduler.tick_once().await.unwrap();
        assert_eq!(outcome.paused, 1);
        assert_eq!(outcome.jobs, 0);
        assert!(dispatcher.requests().is_empty());
        assert!(repository.load_pending(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_dispatch_marks_build_errored() {
        let (scheduler, repository, _dispatcher) = setup(pipeline(triggered_job()), true);
        repository.add_version(ResourceVersion::new(REPO, 1, 1));

        let outcome = scheduler.tick_once().await.unwrap();
        assert_eq!(outcome.failures, 1);

        let builds = repository.builds(10);
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].1.status, BuildStatus::Errored);
    }

    #[tokio::test]
    async fn test_configuration_error_is_stored_and_cleared() {
        let job = JobConfig::new(10, "unit")
            .with_input(JobInputConfig::new("lib", "library").trigger());
        let (scheduler, repository, dispatcher) = setup(pipeline(job), false);

        scheduler.tick_once().await.unwrap();
        let error = repository.status(10).config_error.unwrap();
        assert!(error.contains("unknown resource 'library'"));

        repository.add_resource(1, "library", 2);
        repository.add_version(ResourceVersion::new(2, 1, 1));
        scheduler.tick_once().await.unwrap();

        assert!(repository.status(10).config_error.is_none());
        assert_eq!(dispatcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_every_version_builds_each_tuple_oldest_first() {
        let job = JobConfig::new(10, "unit")
            .with_input(JobInputConfig::new("repo", "repo").every().trigger());
        let (scheduler, repository, dispatcher) = setup(pipeline(job), false);
        for id in 1..=3 {
            repository.add_version(ResourceVersion::new(REPO, id, id));
        }

        let outcome = scheduler.tick_once().await.unwrap();
        assert_eq!(outcome.builds, 3);

        let versions: Vec<_> = dispatcher.requests().iter().map(version_of).collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let outcome = scheduler.tick_once().await.unwrap();
        assert_eq!(outcome.builds, 0);
    }

    #[tokio::test]
    async fn test_passed_constraint_waits_for_succeeded_upstream() {
        let pipeline = PipelineConfig::new(1, "main")
            .with_job(
                JobConfig::new(10, "build")
                    .with_input(JobInputConfig::new("repo", "repo").trigger()),
            )
            .with_job(
                JobConfig::new(11, "test").with_input(
                    JobInputConfig::new("repo", "repo")
                        .passed(["build"])
                        .trigger(),
                ),
            );
        let (scheduler, repository, dispatcher) = setup(pipeline, false);
        repository.add_version(ResourceVersion::new(REPO, 1, 1));

        scheduler.tick_once().await.unwrap();
        let requests = dispatcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].job_name, "build");

        repository
            .finish_build(requests[0].build_id, BuildStatus::Succeeded, &[])
            .await
            .unwrap();
        scheduler.tick_once().await.unwrap();

        let requests = dispatcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].job_name, "test");
        assert_eq!(version_of(&requests[1]), 1);
    }

    #[tokio::test]
    async fn test_manual_triggers_build_every_version_in_order() {
        let job = JobConfig::new(10, "unit").with_input(JobInputConfig::new("repo", "repo").every());
        let (scheduler, repository, dispatcher) = setup(pipeline(job), false);
        for id in 1..=3 {
            repository.add_version(ResourceVersion::new(REPO, id, id));
        }

        for _ in 0..3 {
            repository.request_manual_trigger(10).await.unwrap();
            let outcome = scheduler.tick_once().await.unwrap();
            assert_eq!(outcome.builds, 1);
        }

        let versions: Vec<_> = dispatcher.requests().iter().map(version_of).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert!(dispatcher.requests().iter().all(|r| r.manually_triggered));
    }

    struct UnavailableBuilds;

    #[async_trait]
    impl BuildRepository for UnavailableBuilds {
        async fn create_build(
            &self,
            _job_id: conveyor_core::domain::job::JobId,
            _mapping: &InputMapping,
            _manually_triggered: bool,
        ) -> crate::repository::Result<BuildId> {
            Err(RepositoryError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn finish_build(
            &self,
            _build_id: BuildId,
            _status: BuildStatus,
            _outputs: &[conveyor_core::dto::build::OutputVersion],
        ) -> crate::repository::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_manual_trigger_survives_failed_build_creation() {
        let job = JobConfig::new(10, "unit").with_input(JobInputConfig::new("repo", "repo"));
        let (scheduler, repository, dispatcher) = setup(pipeline(job), false);
        repository.add_version(ResourceVersion::new(REPO, 1, 1));
        repository.request_manual_trigger(10).await.unwrap();

        let failing = Scheduler::new(
            Config::default(),
            Repositories {
                builds: Arc::new(UnavailableBuilds),
                ..Repositories::shared(repository.clone())
            },
            dispatcher.clone(),
        );
        let outcome = failing.tick_once().await.unwrap();
        assert_eq!(outcome.failures, 1);
        assert!(repository.status(10).manual_trigger_requested);
        assert!(dispatcher.requests().is_empty());

        let outcome = scheduler.tick_once().await.unwrap();
        assert_eq!(outcome.builds, 1);
        assert!(dispatcher.requests()[0].manually_triggered);
        assert!(!repository.status(10).manual_trigger_requested);
    }

    #[tokio::test]
    async fn test_steady_state_ticks_do_not_write() {
        let (scheduler, repository, _dispatcher) = setup(pipeline(triggered_job()), false);
        repository.add_version(ResourceVersion::new(REPO, 1, 1));

        // the build consumed the mapping; the next tick stores the rebuilt one
        scheduler.tick_once().await.unwrap();
        scheduler.tick_once().await.unwrap();
        let pending_writes = repository.pending_writes();

        scheduler.tick_once().await.unwrap();
        scheduler.tick_once().await.unwrap();
        assert_eq!(repository.pending_writes(), pending_writes);
        assert_eq!(repository.config_error_writes(), 0);
    }
}
