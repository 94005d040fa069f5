//! Fixture factories for sample domain data.

use chrono::Utc;
use slipway_core::event::{Event, EventCreator};
use slipway_core::ids::{EventId, JobId, PipelineId};
use slipway_core::pipeline::{Job, JobState, Permutation, Pipeline, ScmRepo};
use slipway_core::workflow::{TRIGGER_COMMIT, TRIGGER_PR, WorkflowGraph};
use slipway_core::MetaMap;

pub struct PipelineFixture;

impl PipelineFixture {
    /// A pipeline whose graph reads `~commit → main → deploy` with `~pr`
    /// also wired to `main`, administered by `alice`.
    pub fn simple() -> Pipeline {
        let mut pipeline = Self::bare();
        pipeline.workflow_graph = WorkflowGraph::new(
            [TRIGGER_COMMIT, TRIGGER_PR, "main", "deploy"],
            [
                (TRIGGER_COMMIT, "main"),
                (TRIGGER_PR, "main"),
                ("main", "deploy"),
            ],
        );
        pipeline
    }

    /// A pipeline with no workflow edges.
    pub fn bare() -> Pipeline {
        Pipeline {
            id: PipelineId::new(),
            scm_uri: "github.com:1234:main".to_string(),
            scm_context: "github:github.com".to_string(),
            scm_repo: ScmRepo {
                name: "org/repo".to_string(),
                branch: "main".to_string(),
                url: None,
            },
            config_pipeline_id: None,
            workflow_graph: WorkflowGraph::default(),
            admins: [("alice".to_string(), true)].into_iter().collect(),
            jobs: vec![],
        }
    }
}

pub struct JobFixture;

impl JobFixture {
    pub fn enabled(pipeline_id: PipelineId, name: &str) -> Job {
        Job {
            id: JobId::new(),
            pipeline_id,
            name: name.to_string(),
            state: JobState::Enabled,
            archived: false,
            permutations: vec![Permutation {
                image: Some("node:lts".to_string()),
                ..Default::default()
            }],
        }
    }

    pub fn disabled(pipeline_id: PipelineId, name: &str) -> Job {
        let mut job = Self::enabled(pipeline_id, name);
        job.state = JobState::Disabled;
        job
    }
}

pub struct EventFixture;

impl EventFixture {
    /// A commit event for the pipeline, snapshotting its current graph.
    pub fn commit(pipeline: &Pipeline) -> Event {
        Event {
            id: EventId::new(),
            pipeline_id: pipeline.id,
            sha: "abc123def456".to_string(),
            start_from: TRIGGER_COMMIT.to_string(),
            workflow_graph: pipeline.workflow_graph.clone(),
            parent_event_id: None,
            parent_build_id: None,
            meta: MetaMap::new(),
            creator: EventCreator {
                username: "octocat".to_string(),
                scm_context: pipeline.scm_context.clone(),
            },
            pr_num: None,
            create_time: Utc::now(),
        }
    }
}
