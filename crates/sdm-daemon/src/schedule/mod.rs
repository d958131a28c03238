//! Goal schedulers: launch isolated workers for goals that should not run
//! inside the daemon process.

mod kubernetes;
mod subprocess;

use async_trait::async_trait;
use thiserror::Error;

use sdm_core::goal::GoalState;

use crate::dispatch::GoalInvocation;

pub use kubernetes::{
    build_job_manifest, job_name, spawn_cleanup, JobApi, JobManifestParams, K8sError, Kubectl,
    KubernetesGoalScheduler,
};
pub use subprocess::SubprocessScheduler;

/// Errors raised while scheduling a goal.
///
/// Scheduler errors are recorded on the goal as `Failed to schedule goal`;
/// the event handler still reports success to the bus.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScheduleError {
    /// The Kubernetes API interaction failed.
    #[error(transparent)]
    Kubernetes(#[from] K8sError),

    /// Spawning the worker process failed.
    #[error("spawning worker failed: {0}")]
    Spawn(#[from] std::io::Error),

    /// The scheduler is missing required configuration.
    #[error("scheduler misconfigured: {message}")]
    Misconfigured {
        /// What is missing.
        message: String,
    },
}

/// What a scheduler reports back.
#[derive(Debug, Clone, Default)]
pub struct ScheduleResult {
    /// Nonzero marks the goal failed.
    pub code: i32,
    /// Explicit state override.
    pub state: Option<GoalState>,
    /// Phase detail; `scheduled` when a worker will pick the goal up.
    pub phase: Option<String>,
    /// Description surfaced on the goal.
    pub description: Option<String>,
}

impl ScheduleResult {
    /// A worker was launched; the goal stays in process until the worker
    /// publishes the real terminal state.
    #[must_use]
    pub fn scheduled() -> Self {
        Self {
            code: 0,
            state: None,
            phase: Some("scheduled".to_string()),
            description: None,
        }
    }
}

/// Launches isolated workers for goal invocations.
#[async_trait]
pub trait GoalScheduler: Send + Sync {
    /// The scheduler name, for logs.
    fn name(&self) -> &str;

    /// Whether this scheduler takes the invocation. The first scheduler
    /// that supports an invocation wins.
    fn supports(&self, invocation: &GoalInvocation) -> bool;

    /// Launches the worker.
    async fn schedule(&self, invocation: &GoalInvocation)
        -> Result<ScheduleResult, ScheduleError>;
}
