//! In-memory implementations of the store ports.

use async_trait::async_trait;
use serde_json::Value;
use slipway_core::build::Build;
use slipway_core::event::Event;
use slipway_core::ids::{BuildId, EventId, JobId, PipelineId, StageBuildId};
use slipway_core::pipeline::{ExternalRef, Job, Pipeline};
use slipway_core::ports::{
    BuildStore, EventStore, JobStore, PipelineStore, StageBuild, StageBuildStore, StepStore,
    Trigger, TriggerStore, UserStore,
};
use slipway_core::{Error, MetaMap, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryPipelineStore {
    pipelines: RwLock<HashMap<PipelineId, Pipeline>>,
}

impl MemoryPipelineStore {
    pub async fn insert(&self, pipeline: Pipeline) {
        self.pipelines.write().await.insert(pipeline.id, pipeline);
    }
}

#[async_trait]
impl PipelineStore for MemoryPipelineStore {
    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(self.pipelines.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<Vec<Job>>,
}

impl MemoryJobStore {
    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.push(job);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.iter().find(|j| j.id == id).cloned())
    }

    async fn list_by_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| j.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<EventId, Event>>,
}

impl MemoryEventStore {
    pub async fn insert(&self, event: Event) {
        self.events.write().await.insert(event.id, event);
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn save(&self, event: &Event) -> Result<()> {
        self.events.write().await.insert(event.id, event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBuildStore {
    builds: RwLock<HashMap<BuildId, Build>>,
}

impl MemoryBuildStore {
    pub async fn insert(&self, build: Build) {
        self.builds.write().await.insert(build.id, build);
    }

    pub async fn contains(&self, id: BuildId) -> bool {
        self.builds.read().await.contains_key(&id)
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn get(&self, id: BuildId) -> Result<Option<Build>> {
        Ok(self.builds.read().await.get(&id).cloned())
    }

    async fn save(&self, build: &Build) -> Result<()> {
        self.builds.write().await.insert(build.id, build.clone());
        Ok(())
    }

    async fn update_fields(&self, id: BuildId, fields: MetaMap) -> Result<()> {
        let mut builds = self.builds.write().await;
        let Some(build) = builds.get_mut(&id) else {
            return Err(Error::BuildNotFound(id.to_string()));
        };

        let mut value =
            serde_json::to_value(&*build).map_err(|e| Error::Store(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            for (key, field) in fields {
                map.insert(key, field);
            }
        }
        *build = serde_json::from_value(value).map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, id: BuildId) -> Result<()> {
        self.builds.write().await.remove(&id);
        Ok(())
    }
}

/// Steps live on the build record; this fake stands in for the separate
/// step table of the real store and records batch deletions.
#[derive(Default)]
pub struct MemoryStepStore {
    removed: RwLock<Vec<BuildId>>,
    fail: AtomicBool,
}

impl MemoryStepStore {
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub async fn removed(&self) -> Vec<BuildId> {
        self.removed.read().await.clone()
    }
}

#[async_trait]
impl StepStore for MemoryStepStore {
    async fn remove_by_build(&self, build_id: BuildId) -> Result<()> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(Error::Store("step removal failed".to_string()));
        }
        self.removed.write().await.push(build_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTriggerStore {
    triggers: RwLock<Vec<Trigger>>,
}

impl MemoryTriggerStore {
    pub async fn all(&self) -> Vec<Trigger> {
        self.triggers.read().await.clone()
    }
}

#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn save(&self, trigger: &Trigger) -> Result<()> {
        self.triggers.write().await.push(trigger.clone());
        Ok(())
    }

    async fn list_by_src(&self, src: &str) -> Result<Vec<Trigger>> {
        Ok(self
            .triggers
            .read()
            .await
            .iter()
            .filter(|t| t.src == src)
            .cloned()
            .collect())
    }

    async fn remove_by_dest_pipeline(&self, pipeline_id: PipelineId) -> Result<()> {
        self.triggers.write().await.retain(|t| {
            ExternalRef::parse(&t.dest)
                .map(|r| r.pipeline_id != pipeline_id)
                .unwrap_or(true)
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStageBuildStore {
    records: RwLock<Vec<StageBuild>>,
}

impl MemoryStageBuildStore {
    pub async fn insert(&self, record: StageBuild) {
        self.records.write().await.push(record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl StageBuildStore for MemoryStageBuildStore {
    async fn get_by_build(&self, build_id: BuildId) -> Result<Option<StageBuild>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.build_id == build_id)
            .cloned())
    }

    async fn remove(&self, id: StageBuildId) -> Result<()> {
        self.records.write().await.retain(|r| r.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    tokens: RwLock<HashMap<(String, String), String>>,
}

impl MemoryUserStore {
    pub async fn insert(&self, username: &str, scm_context: &str, token: &str) {
        self.tokens.write().await.insert(
            (username.to_string(), scm_context.to_string()),
            token.to_string(),
        );
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn scm_token(&self, username: &str, scm_context: &str) -> Result<Option<String>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(&(username.to_string(), scm_context.to_string()))
            .cloned())
    }
}
