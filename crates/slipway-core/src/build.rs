//! Build and step types.

use crate::MetaMap;
use crate::ids::{BuildId, EventId, JobId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Exit code stamped on steps aborted by a terminal transition
/// (128 + SIGINT).
pub const ABORT_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Queued,
    Running,
    Success,
    Failure,
    Aborted,
    Unstable,
    Collapsed,
    Frozen,
}

impl BuildStatus {
    /// Statuses from which no further automatic transition occurs.
    /// `Unstable` is terminal only once an end time is present; see
    /// [`Build::is_done`].
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success
                | BuildStatus::Failure
                | BuildStatus::Aborted
                | BuildStatus::Collapsed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Queued => "QUEUED",
            BuildStatus::Running => "RUNNING",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::Aborted => "ABORTED",
            BuildStatus::Unstable => "UNSTABLE",
            BuildStatus::Collapsed => "COLLAPSED",
            BuildStatus::Frozen => "FROZEN",
        };
        write!(f, "{}", s)
    }
}

/// One or many parent builds (restarts and fan-in joins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParentBuilds {
    One(BuildId),
    Many(Vec<BuildId>),
}

impl ParentBuilds {
    pub fn ids(&self) -> Vec<BuildId> {
        match self {
            ParentBuilds::One(id) => vec![*id],
            ParentBuilds::Many(ids) => ids.clone(),
        }
    }
}

/// A step of a build. Created lazily as the executor reports progress;
/// finalized with [`ABORT_EXIT_CODE`] when the parent build terminates
/// abnormally while the step is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Build {
    pub id: BuildId,
    pub job_id: JobId,
    pub event_id: EventId,
    pub status: BuildStatus,
    /// Status a frozen build resumes into. Freeze-window enforcement is
    /// the executor's responsibility; this core only carries the value.
    #[serde(default)]
    pub previous_status: Option<BuildStatus>,
    pub sha: String,
    #[serde(default)]
    pub container: Option<String>,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Effective metadata. Reserved keys: `meta`, `parameters`, `build`,
    /// `event`, `sd`.
    #[serde(default)]
    pub meta: MetaMap,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub build_cluster_name: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub parent_build_id: Option<ParentBuilds>,
    /// Executor-recorded timings (queue-enter, image-pull), carried opaquely.
    #[serde(default)]
    pub stats: MetaMap,

    /// Persisted fields changed since the last store write.
    #[serde(skip)]
    #[schemars(skip)]
    dirty: BTreeSet<&'static str>,
}

impl Build {
    pub fn new(job_id: JobId, event_id: EventId, sha: impl Into<String>) -> Self {
        Self {
            id: BuildId::new(),
            job_id,
            event_id,
            status: BuildStatus::Queued,
            previous_status: None,
            sha: sha.into(),
            container: None,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            meta: MetaMap::new(),
            steps: Vec::new(),
            build_cluster_name: None,
            template_id: None,
            parent_build_id: None,
            stats: MetaMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Whether this build has reached a state from which no further
    /// automatic transition occurs. `Unstable` without an end time means
    /// "still executing, degraded" and is not done.
    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
            || (self.status == BuildStatus::Unstable && self.end_time.is_some())
    }

    pub fn set_status(&mut self, status: BuildStatus) {
        if status == self.status {
            return;
        }
        if status == BuildStatus::Frozen {
            self.previous_status = Some(self.status);
            self.dirty.insert("previous_status");
        }
        self.status = status;
        self.dirty.insert("status");
    }

    pub fn set_start_time(&mut self, at: DateTime<Utc>) {
        self.start_time = Some(at);
        self.dirty.insert("start_time");
    }

    pub fn set_end_time(&mut self, at: DateTime<Utc>) {
        self.end_time = Some(at);
        self.dirty.insert("end_time");
    }

    pub fn set_meta(&mut self, meta: MetaMap) {
        self.meta = meta;
        self.dirty.insert("meta");
    }

    pub fn set_steps(&mut self, steps: Vec<Step>) {
        self.steps = steps;
        self.dirty.insert("steps");
    }

    pub fn set_stats(&mut self, stats: MetaMap) {
        self.stats = stats;
        self.dirty.insert("stats");
    }

    pub fn is_dirty(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Snapshot of the changed fields, by name, for the store's
    /// apply-dirty-fields contract.
    pub fn dirty_fields(&self) -> MetaMap {
        let mut fields = MetaMap::new();
        for field in &self.dirty {
            let value = match *field {
                "status" => serde_json::to_value(self.status),
                "previous_status" => serde_json::to_value(self.previous_status),
                "start_time" => serde_json::to_value(self.start_time),
                "end_time" => serde_json::to_value(self.end_time),
                "meta" => serde_json::to_value(&self.meta),
                "steps" => serde_json::to_value(&self.steps),
                "stats" => serde_json::to_value(&self.stats),
                _ => continue,
            };
            if let Ok(value) = value {
                fields.insert((*field).to_string(), value);
            }
        }
        fields
    }

    /// Stamp an end time and the abort sentinel on every step that started
    /// but never ended. Unstarted and completed steps are left untouched.
    /// Returns the number of steps aborted.
    pub fn abort_open_steps(&mut self, now: DateTime<Utc>) -> usize {
        let mut aborted = 0;
        for step in &mut self.steps {
            if step.start_time.is_some() && step.end_time.is_none() {
                step.end_time = Some(now);
                step.code = Some(ABORT_EXIT_CODE);
                aborted += 1;
            }
        }
        if aborted > 0 {
            self.dirty.insert("steps");
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn build() -> Build {
        Build::new(JobId::new(), EventId::new(), "abc123")
    }

    #[test]
    fn test_is_done_truth_table() {
        let mut b = build();
        for status in [
            BuildStatus::Aborted,
            BuildStatus::Failure,
            BuildStatus::Success,
            BuildStatus::Collapsed,
        ] {
            b.status = status;
            b.end_time = None;
            assert!(b.is_done(), "{status} should be done");
        }

        b.status = BuildStatus::Unstable;
        b.end_time = None;
        assert!(!b.is_done(), "UNSTABLE without end time is still running");
        b.end_time = Some(Utc::now());
        assert!(b.is_done(), "UNSTABLE with end time is done");

        for status in [
            BuildStatus::Queued,
            BuildStatus::Running,
            BuildStatus::Frozen,
        ] {
            b.status = status;
            b.end_time = Some(Utc::now());
            assert!(!b.is_done(), "{status} is never done");
        }
    }

    #[test]
    fn test_abort_open_steps() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::minutes(5);
        let mut b = build();
        b.steps = vec![
            Step {
                name: "install".to_string(),
                start_time: Some(earlier),
                end_time: Some(earlier),
                code: Some(0),
            },
            Step {
                name: "test".to_string(),
                start_time: Some(earlier),
                end_time: None,
                code: None,
            },
            Step {
                name: "publish".to_string(),
                start_time: None,
                end_time: None,
                code: None,
            },
        ];

        assert_eq!(b.abort_open_steps(now), 1);
        assert_eq!(b.steps[0].code, Some(0));
        assert_eq!(b.steps[0].end_time, Some(earlier));
        assert_eq!(b.steps[1].code, Some(ABORT_EXIT_CODE));
        assert_eq!(b.steps[1].end_time, Some(now));
        assert_eq!(b.steps[2].start_time, None);
        assert_eq!(b.steps[2].code, None);
        assert!(b.is_dirty("steps"));
    }

    #[test]
    fn test_dirty_tracking() {
        let mut b = build();
        assert!(!b.is_dirty("status"));

        b.set_status(BuildStatus::Running);
        assert!(b.is_dirty("status"));

        let fields = b.dirty_fields();
        assert_eq!(fields["status"], "RUNNING");
        assert!(!fields.contains_key("meta"));

        b.clear_dirty();
        assert!(!b.is_dirty("status"));

        // Setting the same status again does not re-dirty the field.
        b.set_status(BuildStatus::Running);
        assert!(!b.is_dirty("status"));
    }

    #[test]
    fn test_frozen_records_previous_status() {
        let mut b = build();
        b.set_status(BuildStatus::Running);
        b.clear_dirty();

        b.set_status(BuildStatus::Frozen);
        assert_eq!(b.previous_status, Some(BuildStatus::Running));
        assert!(b.is_dirty("previous_status"));
    }

    #[test]
    fn test_parent_builds_forms() {
        let one = ParentBuilds::One(BuildId::new());
        assert_eq!(one.ids().len(), 1);

        let many = ParentBuilds::Many(vec![BuildId::new(), BuildId::new()]);
        assert_eq!(many.ids().len(), 2);

        // Scalar and array forms both deserialize.
        let id = BuildId::new();
        let scalar: ParentBuilds =
            serde_json::from_value(serde_json::json!(id.as_uuid())).unwrap();
        assert_eq!(scalar, ParentBuilds::One(id));
        let array: ParentBuilds =
            serde_json::from_value(serde_json::json!([id.as_uuid()])).unwrap();
        assert_eq!(array, ParentBuilds::Many(vec![id]));
    }
}
