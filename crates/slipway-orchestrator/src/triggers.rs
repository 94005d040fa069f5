//! Trigger resolution.
//!
//! Given a trigger expression and a pipeline's job list and workflow graph,
//! decide which jobs to start. Also maintains the persisted reverse-trigger
//! index consulted by downstream triggering.

use petgraph::graph::{DiGraph, NodeIndex};
use slipway_core::Result;
use slipway_core::ids::TriggerId;
use slipway_core::pipeline::{ExternalRef, Job, Pipeline};
use slipway_core::ports::{Trigger, TriggerStore};
use slipway_core::workflow::{TRIGGER_COMMIT, TRIGGER_PR, WorkflowGraph};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A parsed trigger expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerExpression {
    /// `~commit`
    Commit,
    /// `~pr`
    PullRequest,
    /// `~sd@<pipelineId>:<jobName>`
    External(ExternalRef),
    /// A bare job name (manual/forced start of a single job).
    JobName(String),
    /// Any other `~`-prefixed expression; matches nothing.
    Other(String),
}

impl TriggerExpression {
    pub fn parse(s: &str) -> Self {
        if s == TRIGGER_COMMIT {
            return Self::Commit;
        }
        if s == TRIGGER_PR {
            return Self::PullRequest;
        }
        if let Some(external) = ExternalRef::parse(s) {
            return Self::External(external);
        }
        if s.starts_with('~') {
            return Self::Other(s.to_string());
        }
        Self::JobName(s.to_string())
    }
}

/// Successor queries over a workflow graph.
///
/// Built on demand from the stored node/edge lists; edges referencing
/// unknown nodes are historical drift and are skipped.
pub struct WorkflowIndex {
    graph: DiGraph<String, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl WorkflowIndex {
    pub fn build(workflow: &WorkflowGraph) -> Self {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for node in &workflow.nodes {
            let idx = graph.add_node(node.name.clone());
            name_to_index.insert(node.name.clone(), idx);
        }

        for edge in &workflow.edges {
            match (
                name_to_index.get(&edge.src),
                name_to_index.get(&edge.dest),
            ) {
                (Some(&src), Some(&dest)) => {
                    graph.add_edge(src, dest, ());
                }
                _ => {
                    debug!(src = %edge.src, dest = %edge.dest, "skipping edge with unknown node");
                }
            }
        }

        Self {
            graph,
            name_to_index,
        }
    }

    /// Immediate successors of a node; empty for unknown nodes.
    pub fn successors(&self, name: &str) -> HashSet<&str> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Outgoing)
                    .filter_map(|n| self.graph.node_weight(n))
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Resolves a trigger expression to the jobs it starts.
pub struct TriggerResolver;

impl TriggerResolver {
    pub fn new() -> Self {
        Self
    }

    /// The ordered set of jobs to start for `start_from`.
    ///
    /// The three cases (graph successors of a trigger node, exact name,
    /// pull-request prefix) are evaluated independently and concatenated.
    /// An expression that matches no case yields an empty set, never an
    /// error.
    pub fn jobs_to_start(
        &self,
        start_from: &str,
        jobs: &[Job],
        workflow: &WorkflowGraph,
    ) -> Vec<Job> {
        let expression = TriggerExpression::parse(start_from);
        let mut matched = Vec::new();
        matched.extend(self.from_trigger_node(start_from, &expression, jobs, workflow));
        matched.extend(self.by_exact_name(&expression, jobs));
        matched.extend(self.pr_jobs(&expression, jobs));
        matched
    }

    /// `~commit` and external-trigger expressions start the graph's
    /// immediate successors of that trigger node. PR variants of a
    /// successor match through their logical name.
    fn from_trigger_node(
        &self,
        start_from: &str,
        expression: &TriggerExpression,
        jobs: &[Job],
        workflow: &WorkflowGraph,
    ) -> Vec<Job> {
        let node = match expression {
            TriggerExpression::Commit => TRIGGER_COMMIT,
            TriggerExpression::External(_) => start_from,
            _ => return Vec::new(),
        };

        let index = WorkflowIndex::build(workflow);
        let successors = index.successors(node);

        jobs.iter()
            .filter(|job| job.is_startable() && successors.contains(job.base_name()))
            .cloned()
            .collect()
    }

    fn by_exact_name(&self, expression: &TriggerExpression, jobs: &[Job]) -> Vec<Job> {
        let TriggerExpression::JobName(name) = expression else {
            return Vec::new();
        };

        jobs.iter()
            .filter(|job| job.is_startable() && job.name == *name)
            .cloned()
            .collect()
    }

    fn pr_jobs(&self, expression: &TriggerExpression, jobs: &[Job]) -> Vec<Job> {
        if *expression != TriggerExpression::PullRequest {
            return Vec::new();
        }

        jobs.iter()
            .filter(|job| job.is_startable() && job.is_pr())
            .cloned()
            .collect()
    }
}

impl Default for TriggerResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// The persisted reverse-trigger index: `src → dest` edges where `dest`
/// names a job of the owning pipeline.
pub struct TriggerIndex {
    store: Arc<dyn TriggerStore>,
}

impl TriggerIndex {
    pub fn new(store: Arc<dyn TriggerStore>) -> Self {
        Self { store }
    }

    /// Rebuild the index rows owned by a pipeline from its current
    /// workflow graph. Called whenever the graph changes.
    pub async fn rebuild(&self, pipeline: &Pipeline) -> Result<()> {
        self.store.remove_by_dest_pipeline(pipeline.id).await?;

        for edge in &pipeline.workflow_graph.edges {
            if ExternalRef::parse(&edge.src).is_none() {
                continue;
            }
            let trigger = Trigger {
                id: TriggerId::new(),
                src: edge.src.clone(),
                dest: format!("~sd@{}:{}", pipeline.id, edge.dest),
            };
            self.store.save(&trigger).await?;
        }

        Ok(())
    }

    /// Who triggers off the given expression.
    pub async fn downstream(&self, src: &str) -> Result<Vec<Trigger>> {
        self.store.list_by_src(src).await
    }
}
