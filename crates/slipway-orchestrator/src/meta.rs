//! Metadata inheritance.
//!
//! Computes a build's effective `meta` by merging its ancestry: the owning
//! event (and its parent event), then every parent build. Parent builds in
//! the same pipeline merge at the top level in ascending end-time order;
//! parent builds from other pipelines land under the `sd` namespace, with
//! the single most recent of them also merged at the top level so a simple
//! consumer can read `meta.<key>` for "whatever the latest external
//! producer said".
//!
//! One-shot and best-effort: an ancestor whose build or job can no longer
//! be resolved is skipped, never fatal.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{Value, json};
use slipway_core::build::Build;
use slipway_core::ids::PipelineId;
use slipway_core::pipeline::Job;
use slipway_core::ports::{BuildStore, EventStore, JobStore};
use slipway_core::{Error, MetaMap, Result};
use std::sync::Arc;
use tracing::warn;

/// Transient key used for pull-request comment rendering; never inherited.
const SUMMARY_KEY: &str = "summary";
const PARAMETERS_KEY: &str = "parameters";
const SD_KEY: &str = "sd";

pub struct MetaInheritance {
    events: Arc<dyn EventStore>,
    builds: Arc<dyn BuildStore>,
    jobs: Arc<dyn JobStore>,
}

/// One parent build's contribution.
struct Contribution {
    end_time: Option<DateTime<Utc>>,
    meta: MetaMap,
    /// `Some` for foreign-pipeline parents.
    foreign: Option<(PipelineId, String)>,
}

impl MetaInheritance {
    pub fn new(
        events: Arc<dyn EventStore>,
        builds: Arc<dyn BuildStore>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            events,
            builds,
            jobs,
        }
    }

    /// Seed `build.meta` from its ancestry. Anything already on the
    /// build's own meta (operator-supplied restart parameters) is
    /// preserved over every inherited layer; the identity stamps win over
    /// everything.
    pub async fn init_meta(&self, build: &mut Build, job: &Job) -> Result<()> {
        let event = self
            .events
            .get(build.event_id)
            .await?
            .ok_or_else(|| Error::EventNotFound(build.event_id.to_string()))?;

        let own = build.meta.clone();
        let mut merged = MetaMap::new();

        if let Some(parent_event_id) = event.parent_event_id {
            match self.events.get(parent_event_id).await? {
                Some(parent_event) => {
                    merge_layer(&mut merged, &strip_summary(parent_event.meta))
                }
                None => warn!(%parent_event_id, "parent event is gone, skipping its meta"),
            }
        }
        merge_layer(&mut merged, &strip_summary(event.meta.clone()));

        let contributions = self.collect_parent_contributions(build, job).await?;

        let (internal, external): (Vec<_>, Vec<_>) = contributions
            .into_iter()
            .partition(|c| c.foreign.is_none());

        // Top-level precedence runs by end time across internal parents
        // and the single latest external contribution.
        let mut top_level: Vec<&Contribution> = internal.iter().collect();
        if let Some(latest) = external.iter().max_by_key(|c| c.end_time) {
            top_level.push(latest);
        }
        top_level.sort_by_key(|c| c.end_time);
        for contribution in top_level {
            merge_layer(&mut merged, &contribution.meta);
        }

        // Every external contribution is addressable precisely under
        // `sd.<pipelineId>.<jobName>`.
        let mut external_sorted: Vec<&Contribution> = external.iter().collect();
        external_sorted.sort_by_key(|c| c.end_time);
        for contribution in external_sorted {
            let (pipeline_id, job_name) = contribution
                .foreign
                .as_ref()
                .expect("external contribution carries its origin");
            let sd = merged
                .entry(SD_KEY.to_string())
                .or_insert_with(|| json!({}));
            if !sd.is_object() {
                *sd = json!({});
            }
            let by_pipeline = sd
                .as_object_mut()
                .expect("sd namespace is an object")
                .entry(pipeline_id.to_string())
                .or_insert_with(|| json!({}));
            if !by_pipeline.is_object() {
                *by_pipeline = json!({});
            }
            by_pipeline
                .as_object_mut()
                .expect("sd pipeline entry is an object")
                .insert(job_name.clone(), Value::Object(contribution.meta.clone()));
        }

        merge_layer(&mut merged, &own);

        merged.insert(
            "build".to_string(),
            json!({
                "pipelineId": job.pipeline_id.to_string(),
                "eventId": build.event_id.to_string(),
                "jobId": build.job_id.to_string(),
                "buildId": build.id.to_string(),
                "jobName": job.name,
                "sha": build.sha,
            }),
        );
        merged.insert(
            "event".to_string(),
            json!({
                "creator": {
                    "username": event.creator.username,
                    "scmContext": event.creator.scm_context,
                }
            }),
        );

        build.set_meta(merged);
        Ok(())
    }

    /// Fetch every parent build and its owning job, classify each as
    /// internal (same pipeline as this build's job) or external, and shape
    /// its meta accordingly. Unresolvable parents are skipped.
    async fn collect_parent_contributions(
        &self,
        build: &Build,
        job: &Job,
    ) -> Result<Vec<Contribution>> {
        let parent_ids = build
            .parent_build_id
            .as_ref()
            .map(|p| p.ids())
            .unwrap_or_default();
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let parents = join_all(parent_ids.iter().map(|id| self.builds.get(*id))).await;
        let mut resolved = Vec::new();
        for (id, parent) in parent_ids.iter().zip(parents) {
            match parent? {
                Some(parent) => resolved.push(parent),
                None => warn!(parent_build_id = %id, "parent build is gone, skipping its meta"),
            }
        }

        let parent_jobs =
            join_all(resolved.iter().map(|p| self.jobs.get(p.job_id))).await;

        let mut contributions = Vec::new();
        for (parent, parent_job) in resolved.into_iter().zip(parent_jobs) {
            let Some(parent_job) = parent_job? else {
                warn!(
                    parent_build_id = %parent.id,
                    "parent build's job is gone, skipping its meta"
                );
                continue;
            };

            let mut meta = strip_summary(parent.meta);
            let foreign = if parent_job.pipeline_id == job.pipeline_id {
                None
            } else {
                // Foreign parameters never participate in inheritance.
                meta.remove(PARAMETERS_KEY);
                Some((parent_job.pipeline_id, parent_job.name.clone()))
            };
            contributions.push(Contribution {
                end_time: parent.end_time,
                meta,
                foreign,
            });
        }

        Ok(contributions)
    }
}

fn strip_summary(mut meta: MetaMap) -> MetaMap {
    meta.remove(SUMMARY_KEY);
    meta
}

/// Shallow top-level merge: later writers overwrite earlier on key
/// collision, except the reserved `parameters` sub-map which merges
/// per key.
fn merge_layer(dest: &mut MetaMap, src: &MetaMap) {
    for (key, value) in src {
        if key == PARAMETERS_KEY
            && let Some(Value::Object(existing)) = dest.get_mut(PARAMETERS_KEY)
            && let Value::Object(incoming) = value
        {
            for (k, v) in incoming {
                existing.insert(k.clone(), v.clone());
            }
            continue;
        }
        dest.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use slipway_core::build::ParentBuilds;
    use slipway_core::event::{Event, EventCreator};
    use slipway_core::ids::{BuildId, EventId, JobId};
    use slipway_core::pipeline::{JobState, Permutation};
    use slipway_core::workflow::WorkflowGraph;
    use std::collections::HashMap;

    struct FakeEvents {
        events: HashMap<EventId, Event>,
    }

    #[async_trait]
    impl EventStore for FakeEvents {
        async fn get(&self, id: EventId) -> Result<Option<Event>> {
            Ok(self.events.get(&id).cloned())
        }

        async fn save(&self, _event: &Event) -> Result<()> {
            Ok(())
        }
    }

    struct FakeBuilds {
        builds: HashMap<BuildId, Build>,
    }

    #[async_trait]
    impl BuildStore for FakeBuilds {
        async fn get(&self, id: BuildId) -> Result<Option<Build>> {
            Ok(self.builds.get(&id).cloned())
        }

        async fn save(&self, _build: &Build) -> Result<()> {
            Ok(())
        }

        async fn update_fields(&self, _id: BuildId, _fields: MetaMap) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, _id: BuildId) -> Result<()> {
            Ok(())
        }
    }

    struct FakeJobs {
        jobs: HashMap<JobId, Job>,
    }

    #[async_trait]
    impl JobStore for FakeJobs {
        async fn get(&self, id: JobId) -> Result<Option<Job>> {
            Ok(self.jobs.get(&id).cloned())
        }

        async fn list_by_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>> {
            Ok(self
                .jobs
                .values()
                .filter(|j| j.pipeline_id == pipeline_id)
                .cloned()
                .collect())
        }
    }

    fn job(pipeline_id: PipelineId, name: &str) -> Job {
        Job {
            id: JobId::new(),
            pipeline_id,
            name: name.to_string(),
            state: JobState::Enabled,
            archived: false,
            permutations: vec![Permutation::default()],
        }
    }

    fn event(pipeline_id: PipelineId, meta: MetaMap) -> Event {
        Event {
            id: EventId::new(),
            pipeline_id,
            sha: "abc123".to_string(),
            start_from: "~commit".to_string(),
            workflow_graph: WorkflowGraph::default(),
            parent_event_id: None,
            parent_build_id: None,
            meta,
            creator: EventCreator {
                username: "octocat".to_string(),
                scm_context: "github:github.com".to_string(),
            },
            pr_num: None,
            create_time: Utc::now(),
        }
    }

    fn meta(pairs: &[(&str, Value)]) -> MetaMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn parent_build(job: &Job, end_time: DateTime<Utc>, m: MetaMap) -> Build {
        let mut b = Build::new(job.id, EventId::new(), "abc123");
        b.end_time = Some(end_time);
        b.meta = m;
        b
    }

    struct Harness {
        engine: MetaInheritance,
        job: Job,
    }

    fn harness(
        events: Vec<Event>,
        parents: Vec<Build>,
        parent_jobs: Vec<Job>,
        job: Job,
    ) -> Harness {
        let mut all_jobs = parent_jobs;
        all_jobs.push(job.clone());
        Harness {
            engine: MetaInheritance::new(
                Arc::new(FakeEvents {
                    events: events.into_iter().map(|e| (e.id, e)).collect(),
                }),
                Arc::new(FakeBuilds {
                    builds: parents.into_iter().map(|b| (b.id, b)).collect(),
                }),
                Arc::new(FakeJobs {
                    jobs: all_jobs.into_iter().map(|j| (j.id, j)).collect(),
                }),
            ),
            job,
        }
    }

    #[tokio::test]
    async fn test_event_meta_flows_to_build() {
        let pid = PipelineId::new();
        let job = job(pid, "main");
        let ev = event(pid, meta(&[("color", json!("blue"))]));
        let mut build = Build::new(job.id, ev.id, "abc123");
        let h = harness(vec![ev], vec![], vec![], job.clone());

        h.engine.init_meta(&mut build, &h.job).await.unwrap();
        assert_eq!(build.meta["color"], "blue");
    }

    #[tokio::test]
    async fn test_parent_event_loses_to_event() {
        let pid = PipelineId::new();
        let job = job(pid, "main");
        let parent_ev = event(pid, meta(&[("color", json!("red")), ("size", json!("xl"))]));
        let mut ev = event(pid, meta(&[("color", json!("blue"))]));
        ev.parent_event_id = Some(parent_ev.id);
        let mut build = Build::new(job.id, ev.id, "abc123");
        let h = harness(vec![parent_ev, ev], vec![], vec![], job.clone());

        h.engine.init_meta(&mut build, &h.job).await.unwrap();
        assert_eq!(build.meta["color"], "blue");
        assert_eq!(build.meta["size"], "xl");
    }

    #[tokio::test]
    async fn test_internal_parents_merge_by_end_time() {
        let pid = PipelineId::new();
        let this_job = job(pid, "join");
        let job_a = job(pid, "a");
        let job_b = job(pid, "b");
        let t1 = Utc::now();
        let t2 = t1 + Duration::minutes(1);

        let pa = parent_build(&job_a, t1, meta(&[("k", json!(1))]));
        let pb = parent_build(&job_b, t2, meta(&[("k", json!(2))]));

        let ev = event(pid, MetaMap::new());
        let mut build = Build::new(this_job.id, ev.id, "abc123");
        build.parent_build_id = Some(ParentBuilds::Many(vec![pa.id, pb.id]));
        let h = harness(
            vec![ev],
            vec![pa, pb],
            vec![job_a, job_b],
            this_job.clone(),
        );

        h.engine.init_meta(&mut build, &h.job).await.unwrap();
        assert_eq!(build.meta["k"], 2);
    }

    #[tokio::test]
    async fn test_external_parent_lands_in_sd_and_top_level() {
        let pid = PipelineId::new();
        let foreign_pid = PipelineId::new();
        let this_job = job(pid, "join");
        let job_a = job(pid, "a");
        let job_b = job(pid, "b");
        let foreign_job = job(foreign_pid, "publish");
        let t1 = Utc::now();
        let t2 = t1 + Duration::minutes(1);
        let t3 = t2 + Duration::minutes(1);

        let pa = parent_build(&job_a, t1, meta(&[("k", json!(1))]));
        let pb = parent_build(&job_b, t2, meta(&[("k", json!(2))]));
        let pf = parent_build(&foreign_job, t3, meta(&[("k", json!(3))]));

        let ev = event(pid, MetaMap::new());
        let mut build = Build::new(this_job.id, ev.id, "abc123");
        build.parent_build_id = Some(ParentBuilds::Many(vec![pa.id, pb.id, pf.id]));
        let h = harness(
            vec![ev],
            vec![pa, pb, pf],
            vec![job_a, job_b, foreign_job],
            this_job.clone(),
        );

        h.engine.init_meta(&mut build, &h.job).await.unwrap();

        // Latest across ALL parents wins at the top level.
        assert_eq!(build.meta["k"], 3);
        // And the external producer stays precisely addressable.
        let sd = build.meta.get("sd").unwrap();
        assert_eq!(sd[foreign_pid.to_string()]["publish"]["k"], 3);
    }

    #[tokio::test]
    async fn test_older_external_loses_top_level_but_keeps_sd() {
        let pid = PipelineId::new();
        let foreign_pid = PipelineId::new();
        let this_job = job(pid, "join");
        let job_a = job(pid, "a");
        let foreign_job = job(foreign_pid, "publish");
        let t1 = Utc::now();
        let t2 = t1 + Duration::minutes(1);

        let pf = parent_build(&foreign_job, t1, meta(&[("k", json!("ext"))]));
        let pa = parent_build(&job_a, t2, meta(&[("k", json!("int"))]));

        let ev = event(pid, MetaMap::new());
        let mut build = Build::new(this_job.id, ev.id, "abc123");
        build.parent_build_id = Some(ParentBuilds::Many(vec![pf.id, pa.id]));
        let h = harness(
            vec![ev],
            vec![pf, pa],
            vec![job_a, foreign_job],
            this_job.clone(),
        );

        h.engine.init_meta(&mut build, &h.job).await.unwrap();
        assert_eq!(build.meta["k"], "int");
        let sd = build.meta.get("sd").unwrap();
        assert_eq!(sd[foreign_pid.to_string()]["publish"]["k"], "ext");
    }

    #[tokio::test]
    async fn test_external_parameters_are_dropped() {
        let pid = PipelineId::new();
        let foreign_pid = PipelineId::new();
        let this_job = job(pid, "join");
        let foreign_job = job(foreign_pid, "publish");

        let pf = parent_build(
            &foreign_job,
            Utc::now(),
            meta(&[
                ("parameters", json!({"region": "us-east"})),
                ("artifact", json!("v2")),
            ]),
        );

        let ev = event(pid, meta(&[("parameters", json!({"tier": "prod"}))]));
        let mut build = Build::new(this_job.id, ev.id, "abc123");
        build.parent_build_id = Some(ParentBuilds::One(pf.id));
        let h = harness(
            vec![ev],
            vec![pf],
            vec![foreign_job],
            this_job.clone(),
        );

        h.engine.init_meta(&mut build, &h.job).await.unwrap();

        assert_eq!(build.meta["artifact"], "v2");
        assert_eq!(build.meta.get("parameters").unwrap(), &json!({"tier": "prod"}));
        let sd = build.meta.get("sd").unwrap();
        assert_eq!(
            sd[foreign_pid.to_string()]["publish"],
            json!({"artifact": "v2"})
        );
    }

    #[tokio::test]
    async fn test_own_meta_wins_and_summary_never_inherits() {
        let pid = PipelineId::new();
        let this_job = job(pid, "join");
        let job_a = job(pid, "a");

        let pa = parent_build(
            &job_a,
            Utc::now(),
            meta(&[
                ("k", json!("parent")),
                ("summary", json!({"coverage": "90%"})),
            ]),
        );

        let ev = event(pid, meta(&[("summary", json!({"note": "event"}))]));
        let mut build = Build::new(this_job.id, ev.id, "abc123");
        build.parent_build_id = Some(ParentBuilds::One(pa.id));
        build.meta = meta(&[("k", json!("operator"))]);
        let h = harness(
            vec![ev],
            vec![pa],
            vec![job_a],
            this_job.clone(),
        );

        h.engine.init_meta(&mut build, &h.job).await.unwrap();
        assert_eq!(build.meta["k"], "operator");
        assert!(!build.meta.contains_key("summary"));
    }

    #[tokio::test]
    async fn test_identity_stamps() {
        let pid = PipelineId::new();
        let this_job = job(pid, "main");
        let ev = event(pid, meta(&[("build", json!("stale")), ("event", json!("stale"))]));
        let mut build = Build::new(this_job.id, ev.id, "abc123");
        let h = harness(vec![ev], vec![], vec![], this_job.clone());

        h.engine.init_meta(&mut build, &h.job).await.unwrap();

        let stamp = build.meta.get("build").unwrap();
        assert_eq!(stamp["buildId"], build.id.to_string());
        assert_eq!(stamp["pipelineId"], pid.to_string());
        assert_eq!(stamp["jobName"], "main");
        assert_eq!(stamp["sha"], "abc123");
        let event_stamp = build.meta.get("event").unwrap();
        assert_eq!(event_stamp["creator"]["username"], "octocat");
    }

    #[tokio::test]
    async fn test_unresolvable_parent_is_skipped() {
        let pid = PipelineId::new();
        let this_job = job(pid, "main");
        let job_a = job(pid, "a");
        let pa = parent_build(&job_a, Utc::now(), meta(&[("k", json!("kept"))]));

        let ev = event(pid, MetaMap::new());
        let mut build = Build::new(this_job.id, ev.id, "abc123");
        build.parent_build_id = Some(ParentBuilds::Many(vec![BuildId::new(), pa.id]));
        let h = harness(
            vec![ev],
            vec![pa],
            vec![job_a],
            this_job.clone(),
        );

        h.engine.init_meta(&mut build, &h.job).await.unwrap();
        assert_eq!(build.meta["k"], "kept");
    }
}
