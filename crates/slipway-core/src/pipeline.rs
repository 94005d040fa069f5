//! Pipeline and job types.

use crate::MetaMap;
use crate::ids::{JobId, PipelineId};
use crate::workflow::WorkflowGraph;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Pull-request job names encode the PR number and the base job name,
/// e.g. `PR-15:main`.
static PR_JOB_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^PR-(\d+):(.+)$").expect("valid regex"));

/// Cross-pipeline job references: `~sd@<pipelineId>:<jobName>`.
static EXTERNAL_REF: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^~sd@([^:]+):(.+)$").expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Pipeline {
    pub id: PipelineId,
    pub scm_uri: String,
    pub scm_context: String,
    pub scm_repo: ScmRepo,
    /// Template/child relationship to a config pipeline, if any.
    #[serde(default)]
    pub config_pipeline_id: Option<PipelineId>,
    pub workflow_graph: WorkflowGraph,
    /// Usernames with admin rights. Selection of "the" admin is not
    /// guaranteed to be stable across stores; see [`Pipeline::first_admin`].
    #[serde(default)]
    pub admins: BTreeMap<String, bool>,
    /// Ordered job ids belonging to this pipeline.
    #[serde(default)]
    pub jobs: Vec<JobId>,
}

impl Pipeline {
    /// The admin whose credentials sign SCM calls for this pipeline.
    ///
    /// When several admins exist there is no defined tie-break; the first
    /// key in map order is used and its credentials are not validated here.
    pub fn first_admin(&self) -> Option<&str> {
        self.admins
            .iter()
            .find(|(_, active)| **active)
            .map(|(name, _)| name.as_str())
    }
}

/// Repository coordinates used by the SCM adapter.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScmRepo {
    /// `owner/name` slug.
    pub name: String,
    pub branch: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub state: JobState,
    #[serde(default)]
    pub archived: bool,
    /// Variant build configs. Blocked-by and freeze-window resolution read
    /// only the first permutation; matrix jobs are an upstream limitation.
    #[serde(default)]
    pub permutations: Vec<Permutation>,
}

impl Job {
    /// Whether this job may be started at all.
    pub fn is_startable(&self) -> bool {
        self.state == JobState::Enabled && !self.archived
    }

    /// Whether this is a pull-request variant (`PR-<num>:<base>`).
    pub fn is_pr(&self) -> bool {
        PR_JOB_NAME.is_match(&self.name)
    }

    /// The pull-request number, for PR variants.
    pub fn pr_num(&self) -> Option<u64> {
        PR_JOB_NAME
            .captures(&self.name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// The externally-visible logical name: `PR-15:main` → `main`,
    /// anything else unchanged.
    pub fn base_name(&self) -> &str {
        PR_JOB_NAME
            .captures(&self.name)
            .and_then(|c| c.get(2))
            .map(|m| m.as_str())
            .unwrap_or(&self.name)
    }

    /// Names this job is blocked by, from the first permutation.
    pub fn blocked_by_names(&self) -> &[String] {
        self.permutations
            .first()
            .map(|p| p.blocked_by.as_slice())
            .unwrap_or_default()
    }

    pub fn first_permutation(&self) -> Option<&Permutation> {
        self.permutations.first()
    }

    /// Whether this is a stage pseudo-job (`stage@<name>`).
    pub fn is_stage(&self) -> bool {
        self.name.starts_with("stage@")
    }
}

/// One concrete build-configuration variant of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Permutation {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub annotations: MetaMap,
    /// Blackout-window specs, opaque to this core.
    #[serde(default)]
    pub freeze_windows: Vec<String>,
    /// Path filters: a job with source paths only starts when a changed
    /// file falls under one of them.
    #[serde(default)]
    pub source_paths: Vec<String>,
    /// Blocking rules: `name`, `~name`, or `~sd@<pipelineId>:<jobName>`.
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub provider: Option<serde_json::Value>,
}

/// A parsed `~sd@<pipelineId>:<jobName>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRef {
    pub pipeline_id: PipelineId,
    pub job_name: String,
}

impl ExternalRef {
    /// Parse an external reference; `None` when the string is not of the
    /// `~sd@<pipelineId>:<jobName>` form or the id does not parse.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = EXTERNAL_REF.captures(s)?;
        let pipeline_id = caps.get(1)?.as_str().parse().ok()?;
        Some(Self {
            pipeline_id,
            job_name: caps.get(2)?.as_str().to_string(),
        })
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~sd@{}:{}", self.pipeline_id, self.job_name)
    }
}
