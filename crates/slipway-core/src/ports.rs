//! Port traits (hexagonal architecture).
//!
//! These traits define the boundary between the orchestration core and its
//! external collaborators: the keyed record store, the container executor,
//! the SCM adapter, and the token generator. Store lookups return
//! `Ok(None)` on not-found rather than erroring; collaborator failures are
//! surfaced through [`crate::Error`] unchanged.

use crate::MetaMap;
use crate::build::Build;
use crate::event::Event;
use crate::ids::*;
use crate::pipeline::{Job, Pipeline, ScmRepo};
use crate::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A persisted reverse-trigger edge: `src` (a trigger expression, local or
/// foreign) to `dest` (always a `~sd@<pipelineId>:<jobName>` reference).
/// Rebuilt whenever a pipeline's workflow graph changes, so downstream
/// triggering never rescans every other pipeline's graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Trigger {
    pub id: TriggerId,
    pub src: String,
    pub dest: String,
}

/// Join record between a stage and the build representing it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageBuild {
    pub id: StageBuildId,
    pub build_id: BuildId,
    pub stage_name: String,
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Jobs of a pipeline, in the pipeline's job order.
    async fn list_by_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get(&self, id: EventId) -> Result<Option<Event>>;

    async fn save(&self, event: &Event) -> Result<()>;
}

#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn get(&self, id: BuildId) -> Result<Option<Build>>;

    async fn save(&self, build: &Build) -> Result<()>;

    /// Apply the given field changes to the stored record. The caller
    /// passes exactly the fields that changed; the store must not touch
    /// any other field.
    async fn update_fields(&self, id: BuildId, fields: MetaMap) -> Result<()>;

    async fn remove(&self, id: BuildId) -> Result<()>;
}

#[async_trait]
pub trait StepStore: Send + Sync {
    /// Batch-delete every step record belonging to a build.
    async fn remove_by_build(&self, build_id: BuildId) -> Result<()>;
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn save(&self, trigger: &Trigger) -> Result<()>;

    /// Edges whose `src` equals the given expression.
    async fn list_by_src(&self, src: &str) -> Result<Vec<Trigger>>;

    /// Remove every edge whose `dest` references the given pipeline.
    async fn remove_by_dest_pipeline(&self, pipeline_id: PipelineId) -> Result<()>;
}

#[async_trait]
pub trait StageBuildStore: Send + Sync {
    async fn get_by_build(&self, build_id: BuildId) -> Result<Option<StageBuild>>;

    async fn remove(&self, id: StageBuildId) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// A usable SCM token for the given user, or `None` when the user or
    /// token is missing. Sealing/unsealing is the store's concern.
    async fn scm_token(&self, username: &str, scm_context: &str) -> Result<Option<String>>;
}

/// Request to launch a build on the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStartConfig {
    pub build_id: BuildId,
    pub job_id: JobId,
    pub job_name: String,
    pub pipeline_id: PipelineId,
    pub event_id: EventId,
    pub sha: String,
    pub container: Option<String>,
    pub annotations: MetaMap,
    pub freeze_windows: Vec<String>,
    pub blocked_by: Vec<JobId>,
    pub provider: Option<serde_json::Value>,
    /// Freshly minted scoped credential for this build.
    pub token: String,
    pub template_id: Option<String>,
    pub build_cluster_name: Option<String>,
    pub cause_message: Option<String>,
}

/// Request to stop a build. The blocked-by set is part of the stop
/// contract (the executor keys its queues on it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStopConfig {
    pub build_id: BuildId,
    pub job_id: JobId,
    pub job_name: String,
    pub pipeline_id: PipelineId,
    pub annotations: MetaMap,
    pub freeze_windows: Vec<String>,
    pub blocked_by: Vec<JobId>,
    pub provider: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    pub build_id: BuildId,
    pub job_id: JobId,
    pub pipeline_id: PipelineId,
    pub annotations: MetaMap,
    pub provider: Option<serde_json::Value>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerStopConfig {
    pub build_id: BuildId,
    pub provider: Option<serde_json::Value>,
}

/// The container/job executor.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn start(&self, config: &BuildStartConfig) -> Result<()>;

    async fn stop(&self, config: &BuildStopConfig) -> Result<()>;

    /// Discard a frozen build's queue entry.
    async fn stop_frozen(&self, config: &BuildStopConfig) -> Result<()>;

    async fn start_timer(&self, config: &TimerConfig) -> Result<()>;

    async fn stop_timer(&self, config: &TimerStopConfig) -> Result<()>;
}

/// One commit-status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitStatusConfig {
    pub token: String,
    pub scm_uri: String,
    pub scm_context: String,
    pub scm_repo: ScmRepo,
    pub sha: String,
    /// Status token as the SCM adapter expects it (`QUEUED`, `SUCCESS`, ...).
    pub status: String,
    /// Status context, e.g. `slipway/main`.
    pub context: String,
    pub url: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrComment {
    pub text: String,
    /// Marker used to find and refresh a previously posted comment.
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrCommentConfig {
    pub token: String,
    pub scm_uri: String,
    pub scm_context: String,
    pub scm_repo: ScmRepo,
    pub pr_num: u64,
    pub comments: Vec<PrComment>,
}

/// The source-control adapter.
#[async_trait]
pub trait ScmAdapter: Send + Sync {
    async fn update_commit_status(&self, config: &CommitStatusConfig) -> Result<()>;

    async fn add_pr_comment(&self, config: &PrCommentConfig) -> Result<()>;
}

/// Mints scoped per-build credentials. Pure: no I/O beyond reading the
/// clock.
pub trait TokenMinter: Send + Sync {
    fn mint(
        &self,
        build_id: BuildId,
        claims: &MetaMap,
        scm_context: &str,
        ttl_minutes: i64,
        scopes: &[String],
    ) -> Result<String>;
}
