//! A fully wired orchestration core over in-memory fakes.

use crate::fakes::{RecordingExecutor, RecordingScm};
use crate::memory::{
    MemoryBuildStore, MemoryEventStore, MemoryJobStore, MemoryPipelineStore,
    MemoryStageBuildStore, MemoryStepStore, MemoryTriggerStore, MemoryUserStore,
};
use slipway_auth::JwtTokenMinter;
use slipway_core::pipeline::{Job, Pipeline};
use slipway_orchestrator::{LifecycleConfig, Ports, Services};
use std::sync::Arc;

pub struct TestContext {
    pub pipelines: Arc<MemoryPipelineStore>,
    pub jobs: Arc<MemoryJobStore>,
    pub events: Arc<MemoryEventStore>,
    pub builds: Arc<MemoryBuildStore>,
    pub steps: Arc<MemoryStepStore>,
    pub triggers: Arc<MemoryTriggerStore>,
    pub stage_builds: Arc<MemoryStageBuildStore>,
    pub users: Arc<MemoryUserStore>,
    pub executor: Arc<RecordingExecutor>,
    pub scm: Arc<RecordingScm>,
    pub services: Services,
}

impl TestContext {
    pub fn new() -> Self {
        let pipelines = Arc::new(MemoryPipelineStore::default());
        let jobs = Arc::new(MemoryJobStore::default());
        let events = Arc::new(MemoryEventStore::default());
        let builds = Arc::new(MemoryBuildStore::default());
        let steps = Arc::new(MemoryStepStore::default());
        let triggers = Arc::new(MemoryTriggerStore::default());
        let stage_builds = Arc::new(MemoryStageBuildStore::default());
        let users = Arc::new(MemoryUserStore::default());
        let executor = Arc::new(RecordingExecutor::default());
        let scm = Arc::new(RecordingScm::default());

        let ports = Ports {
            pipelines: pipelines.clone(),
            jobs: jobs.clone(),
            events: events.clone(),
            builds: builds.clone(),
            steps: steps.clone(),
            triggers: triggers.clone(),
            stage_builds: stage_builds.clone(),
            users: users.clone(),
            executor: executor.clone(),
            scm: scm.clone(),
            tokens: Arc::new(JwtTokenMinter::new("slipway-tests", b"integration-secret")),
        };
        let services = Services::new(ports, LifecycleConfig::default());

        Self {
            pipelines,
            jobs,
            events,
            builds,
            steps,
            triggers,
            stage_builds,
            users,
            executor,
            scm,
            services,
        }
    }

    /// Insert a pipeline, its jobs, and an SCM token for its admin.
    pub async fn seed_pipeline(&self, pipeline: &Pipeline, jobs: &[Job]) {
        self.pipelines.insert(pipeline.clone()).await;
        for job in jobs {
            self.jobs.insert(job.clone()).await;
        }
        if let Some(admin) = pipeline.first_admin() {
            self.users
                .insert(admin, &pipeline.scm_context, "scm-token")
                .await;
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
