//! Event and build creation.
//!
//! The top-level entry point: given a trigger expression and a commit,
//! resolve the jobs to start, persist the event (with its workflow-graph
//! snapshot), and fan out one build per surviving job through the build
//! lifecycle, honoring per-job source-path filters.

use crate::lifecycle::BuildLifecycle;
use crate::triggers::TriggerResolver;
use chrono::Utc;
use slipway_core::build::{Build, ParentBuilds};
use slipway_core::event::{Event, EventCreator};
use slipway_core::ids::EventId;
use slipway_core::pipeline::{Job, Pipeline};
use slipway_core::ports::{BuildStore, EventStore, JobStore};
use slipway_core::{Error, MetaMap, Result};
use std::sync::Arc;
use tracing::debug;

/// Everything needed to create an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub start_from: String,
    pub sha: String,
    pub creator: EventCreator,
    /// Files touched by the triggering commit, when known. `None` (manual
    /// starts, restarts) disables source-path filtering.
    pub changed_files: Option<Vec<String>>,
    pub parent_event_id: Option<EventId>,
    pub parent_build_id: Option<ParentBuilds>,
    pub meta: MetaMap,
    pub pr_num: Option<u64>,
    pub cause_message: Option<String>,
}

impl NewEvent {
    pub fn new(start_from: impl Into<String>, sha: impl Into<String>, creator: EventCreator) -> Self {
        Self {
            start_from: start_from.into(),
            sha: sha.into(),
            creator,
            changed_files: None,
            parent_event_id: None,
            parent_build_id: None,
            meta: MetaMap::new(),
            pr_num: None,
            cause_message: None,
        }
    }
}

pub struct EventFactory {
    events: Arc<dyn EventStore>,
    jobs: Arc<dyn JobStore>,
    builds: Arc<dyn BuildStore>,
    resolver: TriggerResolver,
    lifecycle: Arc<BuildLifecycle>,
}

impl EventFactory {
    pub fn new(ports: &crate::Ports, lifecycle: Arc<BuildLifecycle>) -> Self {
        Self {
            events: ports.events.clone(),
            jobs: ports.jobs.clone(),
            builds: ports.builds.clone(),
            resolver: TriggerResolver::new(),
            lifecycle,
        }
    }

    /// Create an event and start one build per resolved job.
    ///
    /// An expression that resolves to no startable job is a business
    /// failure (`NoJobsToStart`), not a crash.
    pub async fn create(&self, pipeline: &Pipeline, request: NewEvent) -> Result<(Event, Vec<Build>)> {
        let jobs = self.jobs.list_by_pipeline(pipeline.id).await?;
        let to_start: Vec<Job> = self
            .resolver
            .jobs_to_start(&request.start_from, &jobs, &pipeline.workflow_graph)
            .into_iter()
            .filter(|job| {
                let keep = passes_source_paths(job, request.changed_files.as_deref());
                if !keep {
                    debug!(job = %job.name, "changed files miss the job's source paths");
                }
                keep
            })
            .collect();

        if to_start.is_empty() {
            return Err(Error::NoJobsToStart {
                pipeline_id: pipeline.id.to_string(),
                start_from: request.start_from,
            });
        }

        let event = Event {
            id: EventId::new(),
            pipeline_id: pipeline.id,
            sha: request.sha,
            start_from: request.start_from,
            workflow_graph: pipeline.workflow_graph.clone(),
            parent_event_id: request.parent_event_id,
            parent_build_id: request.parent_build_id,
            meta: request.meta,
            creator: request.creator,
            pr_num: request.pr_num,
            create_time: Utc::now(),
        };
        self.events.save(&event).await?;

        let mut builds = Vec::with_capacity(to_start.len());
        for job in to_start {
            let mut build = Build::new(job.id, event.id, event.sha.clone());
            build.container = job.first_permutation().and_then(|p| p.image.clone());
            build.parent_build_id = event.parent_build_id.clone();
            self.builds.save(&build).await?;
            self.lifecycle
                .start(&mut build, request.cause_message.as_deref())
                .await?;
            builds.push(build);
        }

        Ok((event, builds))
    }
}

/// Whether a job's source-path filter admits this change set. Jobs without
/// source paths always pass; so does any job when the change set is
/// unknown.
fn passes_source_paths(job: &Job, changed_files: Option<&[String]>) -> bool {
    let Some(changed) = changed_files else {
        return true;
    };
    let paths = job
        .first_permutation()
        .map(|p| p.source_paths.as_slice())
        .unwrap_or_default();
    if paths.is_empty() {
        return true;
    }
    changed
        .iter()
        .any(|file| paths.iter().any(|path| source_path_matches(path, file)))
}

/// Entries ending in `/` are directory prefixes; anything else matches the
/// exact file or any file below that path.
fn source_path_matches(path: &str, file: &str) -> bool {
    if path.ends_with('/') {
        return file.starts_with(path);
    }
    file == path
        || file
            .strip_prefix(path)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_core::ids::{JobId, PipelineId};
    use slipway_core::pipeline::{JobState, Permutation};

    fn job_with_paths(paths: &[&str]) -> Job {
        Job {
            id: JobId::new(),
            pipeline_id: PipelineId::new(),
            name: "main".to_string(),
            state: JobState::Enabled,
            archived: false,
            permutations: vec![Permutation {
                source_paths: paths.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            }],
        }
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_directory_prefix_matching() {
        assert!(source_path_matches("src/", "src/main.rs"));
        assert!(source_path_matches("src/", "src/nested/mod.rs"));
        assert!(!source_path_matches("src/", "srcs/main.rs"));
    }

    #[test]
    fn test_file_and_subpath_matching() {
        assert!(source_path_matches("Cargo.toml", "Cargo.toml"));
        assert!(source_path_matches("docs", "docs/guide.md"));
        assert!(!source_path_matches("Cargo.toml", "Cargo.tomlx"));
        assert!(!source_path_matches("docs", "docsy/guide.md"));
    }

    #[test]
    fn test_jobs_without_source_paths_always_pass() {
        let job = job_with_paths(&[]);
        assert!(passes_source_paths(&job, Some(&files(&["anything"]))));
    }

    #[test]
    fn test_unknown_change_set_disables_filtering() {
        let job = job_with_paths(&["src/"]);
        assert!(passes_source_paths(&job, None));
    }

    #[test]
    fn test_source_path_filter() {
        let job = job_with_paths(&["src/", "Cargo.toml"]);
        assert!(passes_source_paths(&job, Some(&files(&["src/lib.rs"]))));
        assert!(passes_source_paths(&job, Some(&files(&["README.md", "Cargo.toml"]))));
        assert!(!passes_source_paths(&job, Some(&files(&["README.md"]))));
        assert!(!passes_source_paths(&job, Some(&files(&[]))));
    }
}
