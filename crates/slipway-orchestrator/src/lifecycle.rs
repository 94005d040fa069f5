//! Build lifecycle.
//!
//! Drives a single build through its state machine: launching on the
//! executor, reacting to status changes (step abortion, timers), reporting
//! commit statuses and pull-request comments, stopping, and removal.
//!
//! SCM reporting inside [`BuildLifecycle::update`] is deliberately
//! best-effort: a flaky status-reporting call must never block the
//! authoritative build-state update. Every other collaborator failure
//! propagates unchanged.

use crate::blocked_by::BlockedByResolver;
use crate::meta::MetaInheritance;
use chrono::Utc;
use serde_json::{Value, json};
use slipway_core::build::{Build, BuildStatus};
use slipway_core::ids::JobId;
use slipway_core::pipeline::{Job, Permutation, Pipeline};
use slipway_core::ports::{
    BuildStartConfig, BuildStopConfig, BuildStore, CommitStatusConfig, Executor, JobStore,
    PipelineStore, PrComment, PrCommentConfig, ScmAdapter, StageBuildStore, StepStore,
    TimerConfig, TimerStopConfig, TokenMinter, UserStore,
};
use slipway_core::{Error, MetaMap, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tunables for lifecycle side effects.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Base URL used for build links in commit statuses.
    pub ui_base_url: String,
    /// Prefix of commit-status contexts, e.g. `slipway/main`.
    pub status_context_prefix: String,
    /// Lifetime of the scoped token minted per build start.
    pub token_ttl_minutes: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ui_base_url: "http://localhost:9000".to_string(),
            status_context_prefix: "slipway".to_string(),
            token_ttl_minutes: 120,
        }
    }
}

pub struct BuildLifecycle {
    pipelines: Arc<dyn PipelineStore>,
    jobs: Arc<dyn JobStore>,
    builds: Arc<dyn BuildStore>,
    steps: Arc<dyn StepStore>,
    stage_builds: Arc<dyn StageBuildStore>,
    users: Arc<dyn UserStore>,
    executor: Arc<dyn Executor>,
    scm: Arc<dyn ScmAdapter>,
    tokens: Arc<dyn TokenMinter>,
    blocked_by: Arc<BlockedByResolver>,
    meta: Arc<MetaInheritance>,
    config: LifecycleConfig,
}

impl BuildLifecycle {
    pub fn new(
        ports: &crate::Ports,
        blocked_by: Arc<BlockedByResolver>,
        meta: Arc<MetaInheritance>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            pipelines: ports.pipelines.clone(),
            jobs: ports.jobs.clone(),
            builds: ports.builds.clone(),
            steps: ports.steps.clone(),
            stage_builds: ports.stage_builds.clone(),
            users: ports.users.clone(),
            executor: ports.executor.clone(),
            scm: ports.scm.clone(),
            tokens: ports.tokens.clone(),
            blocked_by,
            meta,
            config,
        }
    }

    /// Launch a build: resolve blocking, hand the build to the executor,
    /// report the queued commit status, and seed the build's effective
    /// metadata. Executor failure propagates with nothing persisted.
    pub async fn start(&self, build: &mut Build, cause_message: Option<&str>) -> Result<()> {
        let (job, pipeline) = self.job_and_pipeline(build).await?;
        let blocked_by = self.blocked_by.resolve(&pipeline, &job).await?;
        let permutation = job.first_permutation().cloned().unwrap_or_default();

        let mut claims = MetaMap::new();
        claims.insert("pipelineId".to_string(), json!(pipeline.id.to_string()));
        claims.insert("jobId".to_string(), json!(job.id.to_string()));
        claims.insert("eventId".to_string(), json!(build.event_id.to_string()));
        claims.insert("sha".to_string(), json!(build.sha));
        let token = self.tokens.mint(
            build.id,
            &claims,
            &pipeline.scm_context,
            self.config.token_ttl_minutes,
            &["build".to_string()],
        )?;

        self.executor
            .start(&BuildStartConfig {
                build_id: build.id,
                job_id: job.id,
                job_name: job.name.clone(),
                pipeline_id: pipeline.id,
                event_id: build.event_id,
                sha: build.sha.clone(),
                container: build.container.clone(),
                annotations: permutation.annotations.clone(),
                freeze_windows: permutation.freeze_windows.clone(),
                blocked_by,
                provider: permutation.provider.clone(),
                token,
                template_id: build.template_id.clone(),
                build_cluster_name: build.build_cluster_name.clone(),
                cause_message: cause_message.map(String::from),
            })
            .await?;

        self.report_commit_status(
            &pipeline,
            build,
            &BuildStatus::Queued.to_string(),
            job.base_name(),
            None,
            None,
        )
        .await?;

        self.meta.init_meta(build, &job).await?;
        self.builds
            .update_fields(build.id, build.dirty_fields())
            .await?;
        build.clear_dirty();
        Ok(())
    }

    /// React to persisted field changes. Status transitions drive step
    /// abortion, executor stop/timers, and SCM reporting; every dirty
    /// field is then applied through the store's dirty-fields contract.
    pub async fn update(&self, build: &mut Build) -> Result<()> {
        let (job, pipeline) = self.job_and_pipeline(build).await?;

        if build.is_dirty("status") {
            let permutation = job.first_permutation().cloned().unwrap_or_default();

            if build.is_done() {
                build.abort_open_steps(Utc::now());
                let blocked_by = self.blocked_by.resolve(&pipeline, &job).await?;
                self.executor
                    .stop(&stop_config(build, &job, &permutation, blocked_by))
                    .await?;
                self.executor
                    .stop_timer(&TimerStopConfig {
                        build_id: build.id,
                        provider: permutation.provider.clone(),
                    })
                    .await?;
            } else if build.status == BuildStatus::Running {
                self.executor
                    .start_timer(&TimerConfig {
                        build_id: build.id,
                        job_id: job.id,
                        pipeline_id: pipeline.id,
                        annotations: permutation.annotations.clone(),
                        provider: permutation.provider.clone(),
                        start_time: build.start_time.unwrap_or_else(Utc::now),
                    })
                    .await?;
            }

            if let Err(err) = self.report_status_effects(build, &job, &pipeline).await {
                warn!(build_id = %build.id, error = %err, "ignoring SCM reporting failure");
            }
        }

        self.builds
            .update_fields(build.id, build.dirty_fields())
            .await?;
        build.clear_dirty();
        Ok(())
    }

    /// Ask the executor to stop this build and its timer. A no-op on
    /// builds that already reached a terminal state.
    pub async fn stop(&self, build: &Build) -> Result<()> {
        if build.is_done() {
            return Ok(());
        }

        let (job, pipeline) = self.job_and_pipeline(build).await?;
        let permutation = job.first_permutation().cloned().unwrap_or_default();
        let blocked_by = self.blocked_by.resolve(&pipeline, &job).await?;
        let config = stop_config(build, &job, &permutation, blocked_by);

        if build.status == BuildStatus::Frozen {
            self.executor.stop_frozen(&config).await?;
        } else {
            self.executor.stop(&config).await?;
        }
        self.executor
            .stop_timer(&TimerStopConfig {
                build_id: build.id,
                provider: permutation.provider.clone(),
            })
            .await?;
        Ok(())
    }

    /// Delete the build's steps, its stage join record when the build
    /// belongs to a stage pseudo-job, then the build itself. Step removal
    /// failure aborts before the build record is touched.
    pub async fn remove(&self, build: &Build) -> Result<()> {
        self.steps.remove_by_build(build.id).await?;

        let is_stage = self
            .jobs
            .get(build.job_id)
            .await?
            .map(|job| job.is_stage())
            .unwrap_or(false);
        if is_stage
            && let Some(stage_build) = self.stage_builds.get_by_build(build.id).await?
        {
            self.stage_builds.remove(stage_build.id).await?;
        }

        self.builds.remove(build.id).await?;
        Ok(())
    }

    async fn job_and_pipeline(&self, build: &Build) -> Result<(Job, Pipeline)> {
        let job = self
            .jobs
            .get(build.job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(build.job_id.to_string()))?;
        let pipeline = self
            .pipelines
            .get(job.pipeline_id)
            .await?
            .ok_or_else(|| Error::PipelineNotFound(job.pipeline_id.to_string()))?;
        Ok((job, pipeline))
    }

    /// The commit status, PR comment, and per-entry extra statuses for a
    /// freshly changed build status.
    async fn report_status_effects(
        &self,
        build: &Build,
        job: &Job,
        pipeline: &Pipeline,
    ) -> Result<()> {
        self.report_commit_status(
            pipeline,
            build,
            &build.status.to_string(),
            job.base_name(),
            None,
            None,
        )
        .await?;

        if job.is_pr() {
            self.refresh_pr_comment(build, job, pipeline).await?;
        }

        if let Some(Value::Object(statuses)) = build.meta.get("status") {
            for (context_name, raw) in statuses {
                let Some(entry) = parse_status_entry(raw) else {
                    warn!(
                        build_id = %build.id,
                        context = %context_name,
                        "skipping malformed status entry"
                    );
                    continue;
                };
                let description = entry
                    .message
                    .unwrap_or_else(|| default_description(&entry.status));
                self.report_commit_status(
                    pipeline,
                    build,
                    &entry.status,
                    context_name,
                    Some(description),
                    entry.url,
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn refresh_pr_comment(
        &self,
        build: &Build,
        job: &Job,
        pipeline: &Pipeline,
    ) -> Result<()> {
        let Some(Value::Object(summary)) = build.meta.get("summary") else {
            return Ok(());
        };
        let Some(pr_num) = job.pr_num() else {
            return Ok(());
        };
        let Some(token) = self.admin_token(pipeline).await? else {
            return Ok(());
        };

        let comments = summary
            .iter()
            .map(|(name, value)| PrComment {
                text: format!("**{}**\n{}", name, value_to_text(value)),
                keyword: Some(name.clone()),
            })
            .collect();

        self.scm
            .add_pr_comment(&PrCommentConfig {
                token,
                scm_uri: pipeline.scm_uri.clone(),
                scm_context: pipeline.scm_context.clone(),
                scm_repo: pipeline.scm_repo.clone(),
                pr_num,
                comments,
            })
            .await
    }

    async fn report_commit_status(
        &self,
        pipeline: &Pipeline,
        build: &Build,
        status: &str,
        context_suffix: &str,
        description: Option<String>,
        url: Option<String>,
    ) -> Result<()> {
        let Some(token) = self.admin_token(pipeline).await? else {
            return Ok(());
        };

        self.scm
            .update_commit_status(&CommitStatusConfig {
                token,
                scm_uri: pipeline.scm_uri.clone(),
                scm_context: pipeline.scm_context.clone(),
                scm_repo: pipeline.scm_repo.clone(),
                sha: build.sha.clone(),
                status: status.to_string(),
                context: format!("{}/{}", self.config.status_context_prefix, context_suffix),
                url: url.unwrap_or_else(|| self.build_url(pipeline, build)),
                description: description.unwrap_or_else(|| default_description(status)),
            })
            .await
    }

    /// The first admin's SCM token, or `None` (logged) when no admin or
    /// token can be found; that drift must not block builds.
    async fn admin_token(&self, pipeline: &Pipeline) -> Result<Option<String>> {
        let Some(admin) = pipeline.first_admin() else {
            debug!(pipeline_id = %pipeline.id, "pipeline has no admin, skipping SCM report");
            return Ok(None);
        };
        let token = self.users.scm_token(admin, &pipeline.scm_context).await?;
        if token.is_none() {
            debug!(
                pipeline_id = %pipeline.id,
                admin,
                "admin has no usable SCM token, skipping SCM report"
            );
        }
        Ok(token)
    }

    fn build_url(&self, pipeline: &Pipeline, build: &Build) -> String {
        format!(
            "{}/pipelines/{}/builds/{}",
            self.config.ui_base_url, pipeline.id, build.id
        )
    }
}

fn stop_config(
    build: &Build,
    job: &Job,
    permutation: &Permutation,
    blocked_by: Vec<JobId>,
) -> BuildStopConfig {
    BuildStopConfig {
        build_id: build.id,
        job_id: job.id,
        job_name: job.name.clone(),
        pipeline_id: job.pipeline_id,
        annotations: permutation.annotations.clone(),
        freeze_windows: permutation.freeze_windows.clone(),
        blocked_by,
        provider: permutation.provider.clone(),
    }
}

/// An extra commit status carried in `meta.status`.
#[derive(Debug, Clone, serde::Deserialize)]
struct StatusEntry {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Tagged-union parse of a `meta.status` entry: a structured object or a
/// JSON-encoded string of the same shape. Anything else is malformed
/// historical data and yields `None`.
fn parse_status_entry(value: &Value) -> Option<StatusEntry> {
    match value {
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        Value::String(raw) => serde_json::from_str(raw).ok(),
        _ => None,
    }
}

fn default_description(status: &str) -> String {
    match status {
        "QUEUED" => "Build queued.".to_string(),
        "RUNNING" => "Build running.".to_string(),
        "SUCCESS" => "Everything looks good!".to_string(),
        "FAILURE" => "Did not work as expected.".to_string(),
        "ABORTED" => "Build aborted.".to_string(),
        "UNSTABLE" => "Finished with warnings.".to_string(),
        "COLLAPSED" => "Superseded by a newer build.".to_string(),
        "FROZEN" => "Waiting out a freeze window.".to_string(),
        other => format!("Build is {}.", other.to_lowercase()),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_entry_object() {
        let entry = parse_status_entry(&json!({
            "status": "SUCCESS",
            "message": "coverage 92%",
            "url": "https://cov.example.com"
        }))
        .unwrap();
        assert_eq!(entry.status, "SUCCESS");
        assert_eq!(entry.message.as_deref(), Some("coverage 92%"));
        assert_eq!(entry.url.as_deref(), Some("https://cov.example.com"));
    }

    #[test]
    fn test_parse_status_entry_json_string() {
        let entry =
            parse_status_entry(&json!("{\"status\":\"FAILURE\",\"message\":\"lint\"}")).unwrap();
        assert_eq!(entry.status, "FAILURE");
        assert_eq!(entry.message.as_deref(), Some("lint"));
        assert_eq!(entry.url, None);
    }

    #[test]
    fn test_parse_status_entry_malformed() {
        assert!(parse_status_entry(&json!(42)).is_none());
        assert!(parse_status_entry(&json!("not json at all")).is_none());
        assert!(parse_status_entry(&json!(["SUCCESS"])).is_none());
        // An object without a status field is malformed too.
        assert!(parse_status_entry(&json!({"message": "hi"})).is_none());
    }

    #[test]
    fn test_default_descriptions() {
        assert_eq!(default_description("SUCCESS"), "Everything looks good!");
        assert_eq!(default_description("FAILURE"), "Did not work as expected.");
        assert_eq!(default_description("WEIRD"), "Build is weird.");
    }
}
