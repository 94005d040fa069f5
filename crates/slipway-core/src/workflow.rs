//! Workflow graph types.
//!
//! A workflow graph is produced by an external configuration parser and
//! describes which jobs follow which triggers within one pipeline. Trigger
//! nodes are named `~commit`, `~pr`, or `~sd@<pipelineId>:<jobName>`; job
//! nodes carry the bare job name. Events snapshot the graph at creation
//! time so later pipeline edits do not change what an event triggers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The commit trigger node.
pub const TRIGGER_COMMIT: &str = "~commit";

/// The pull-request trigger node.
pub const TRIGGER_PR: &str = "~pr";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowNode {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowEdge {
    pub src: String,
    pub dest: String,
}

impl WorkflowGraph {
    /// Build a graph from node names and `(src, dest)` pairs.
    pub fn new<N, E>(nodes: N, edges: E) -> Self
    where
        N: IntoIterator<Item = &'static str>,
        E: IntoIterator<Item = (&'static str, &'static str)>,
    {
        Self {
            nodes: nodes
                .into_iter()
                .map(|name| WorkflowNode {
                    name: name.to_string(),
                })
                .collect(),
            edges: edges
                .into_iter()
                .map(|(src, dest)| WorkflowEdge {
                    src: src.to_string(),
                    dest: dest.to_string(),
                })
                .collect(),
        }
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == name)
    }
}
