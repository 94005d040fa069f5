//! Event types.
//!
//! An event is created per source-control trigger (push, pull-request
//! action, manual restart) and owns the builds it fans out. The workflow
//! graph is snapshotted onto the event at creation time.

use crate::MetaMap;
use crate::build::ParentBuilds;
use crate::ids::{EventId, PipelineId};
use crate::workflow::WorkflowGraph;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub id: EventId,
    pub pipeline_id: PipelineId,
    pub sha: String,
    /// The trigger expression this event started from: `~commit`, `~pr`,
    /// `~sd@<pipelineId>:<jobName>`, or a bare job name.
    pub start_from: String,
    /// Snapshot taken at event creation; later pipeline edits do not
    /// retroactively change what this event triggers.
    pub workflow_graph: WorkflowGraph,
    #[serde(default)]
    pub parent_event_id: Option<EventId>,
    #[serde(default)]
    pub parent_build_id: Option<ParentBuilds>,
    #[serde(default)]
    pub meta: MetaMap,
    pub creator: EventCreator,
    /// Pull-request number for PR events; used for comment posting.
    #[serde(default)]
    pub pr_num: Option<u64>,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EventCreator {
    pub username: String,
    pub scm_context: String,
}
