//! Slipway Orchestrator
//!
//! The orchestration core: trigger resolution, cross-pipeline blocking,
//! the build lifecycle state machine, metadata inheritance, and event
//! creation. External collaborators (stores, executor, SCM adapter, token
//! minter) are injected through the port traits in `slipway-core`.

pub mod blocked_by;
pub mod events;
pub mod lifecycle;
pub mod meta;
pub mod triggers;

pub use blocked_by::BlockedByResolver;
pub use events::{EventFactory, NewEvent};
pub use lifecycle::{BuildLifecycle, LifecycleConfig};
pub use meta::MetaInheritance;
pub use triggers::{TriggerExpression, TriggerIndex, TriggerResolver, WorkflowIndex};

use slipway_core::ports::{
    BuildStore, EventStore, Executor, JobStore, PipelineStore, ScmAdapter, StageBuildStore,
    StepStore, TokenMinter, TriggerStore, UserStore,
};
use std::sync::Arc;

/// Every collaborator the orchestration core talks to.
#[derive(Clone)]
pub struct Ports {
    pub pipelines: Arc<dyn PipelineStore>,
    pub jobs: Arc<dyn JobStore>,
    pub events: Arc<dyn EventStore>,
    pub builds: Arc<dyn BuildStore>,
    pub steps: Arc<dyn StepStore>,
    pub triggers: Arc<dyn TriggerStore>,
    pub stage_builds: Arc<dyn StageBuildStore>,
    pub users: Arc<dyn UserStore>,
    pub executor: Arc<dyn Executor>,
    pub scm: Arc<dyn ScmAdapter>,
    pub tokens: Arc<dyn TokenMinter>,
}

/// Composition root. Constructs each service exactly once and wires them
/// together explicitly; callers pass the services around rather than
/// reaching for process-global singletons.
pub struct Services {
    pub blocked_by: Arc<BlockedByResolver>,
    pub meta: Arc<MetaInheritance>,
    pub lifecycle: Arc<BuildLifecycle>,
    pub events: EventFactory,
    pub trigger_index: TriggerIndex,
}

impl Services {
    pub fn new(ports: Ports, config: LifecycleConfig) -> Self {
        let blocked_by = Arc::new(BlockedByResolver::new(
            ports.pipelines.clone(),
            ports.jobs.clone(),
        ));
        let meta = Arc::new(MetaInheritance::new(
            ports.events.clone(),
            ports.builds.clone(),
            ports.jobs.clone(),
        ));
        let lifecycle = Arc::new(BuildLifecycle::new(
            &ports,
            blocked_by.clone(),
            meta.clone(),
            config,
        ));
        let events = EventFactory::new(&ports, lifecycle.clone());
        let trigger_index = TriggerIndex::new(ports.triggers.clone());

        Self {
            blocked_by,
            meta,
            lifecycle,
            events,
            trigger_index,
        }
    }
}
