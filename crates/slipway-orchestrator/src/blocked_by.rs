//! Blocked-by resolution.
//!
//! Computes the ordered set of job ids that must be idle before a job's
//! build may run. The set always opens with the job's own id (a job is
//! blocked by a prior instance of itself). Blocking names come from the
//! job's first permutation; matrix jobs are an upstream limitation.

use futures::future::join_all;
use slipway_core::Result;
use slipway_core::ids::JobId;
use slipway_core::pipeline::{ExternalRef, Job, Pipeline};
use slipway_core::ports::{JobStore, PipelineStore};
use std::sync::Arc;
use tracing::debug;

pub struct BlockedByResolver {
    pipelines: Arc<dyn PipelineStore>,
    jobs: Arc<dyn JobStore>,
}

impl BlockedByResolver {
    pub fn new(pipelines: Arc<dyn PipelineStore>, jobs: Arc<dyn JobStore>) -> Self {
        Self { pipelines, jobs }
    }

    /// Resolve the blocked-by set for `job` within `pipeline`.
    ///
    /// Effect-free and idempotent; duplicate names resolve to duplicate
    /// ids, preserving discovery order: self, then internal matches, then
    /// external matches. A dangling cross-pipeline reference is skipped;
    /// it must not block execution.
    pub async fn resolve(&self, pipeline: &Pipeline, job: &Job) -> Result<Vec<JobId>> {
        let mut resolved = vec![job.id];

        let names = job.blocked_by_names();
        if names.is_empty() {
            return Ok(resolved);
        }

        let mut internal = Vec::new();
        let mut external = Vec::new();
        for name in names {
            match ExternalRef::parse(name) {
                Some(reference) => external.push(reference),
                None => internal.push(name.trim_start_matches('~')),
            }
        }

        if !internal.is_empty() {
            let local_jobs = self.jobs.list_by_pipeline(pipeline.id).await?;
            for name in internal {
                resolved.extend(matching_job_ids(&local_jobs, name));
            }
        }

        // Foreign pipelines are independent; fetch them concurrently and
        // join before resolving, preserving the input order.
        let fetches = external.iter().map(|reference| async move {
            match self.pipelines.get(reference.pipeline_id).await? {
                Some(_) => self
                    .jobs
                    .list_by_pipeline(reference.pipeline_id)
                    .await
                    .map(Some),
                None => {
                    debug!(reference = %reference, "skipping dangling cross-pipeline blocked-by reference");
                    Ok(None)
                }
            }
        });

        for (reference, foreign_jobs) in external.iter().zip(join_all(fetches).await) {
            if let Some(foreign_jobs) = foreign_jobs? {
                resolved.extend(matching_job_ids(&foreign_jobs, &reference.job_name));
            }
        }

        Ok(resolved)
    }
}

/// Ids of jobs whose logical name matches, so a rule named `main` matches
/// both the commit job `main` and any PR variant `PR-7:main`.
fn matching_job_ids(jobs: &[Job], name: &str) -> Vec<JobId> {
    jobs.iter()
        .filter(|job| job.base_name() == name)
        .map(|job| job.id)
        .collect()
}
