//! Isolated-worker bootstrap.
//!
//! The same binary hosts two entrypoints: the daemon, and a worker that
//! fulfills exactly one goal. The worker mode is gated on
//! `ATOMIST_ISOLATED_GOAL`; it fetches its goal event by
//! `(goal_set_id, unique_name)` from the store, synthesizes the requested
//! event in memory, runs only the dispatcher handler with a no-op channels
//! adapter, and exits 0 regardless of the goal outcome.

use thiserror::Error;
use tracing::{info, warn};

use sdm_core::goal::GoalState;

use crate::context::SdmContext;
use crate::env;
use crate::handlers::{on_requested, HandlerError};

/// The isolated-goal assignment read from the environment.
#[derive(Debug, Clone)]
pub struct IsolatedGoalEnv {
    /// Goal set id of the assigned goal.
    pub goal_set_id: String,
    /// Unique name of the assigned goal.
    pub unique_name: String,
    /// Correlation id of the triggering event.
    pub correlation_id: Option<String>,
    /// Workspace id.
    pub workspace_id: Option<String>,
    /// Human-readable workspace name.
    pub workspace_name: Option<String>,
}

/// Errors raised by the worker bootstrap.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// The environment marks an isolated goal but lacks its coordinates.
    #[error("isolated goal environment incomplete: missing {variable}")]
    IncompleteEnv {
        /// The missing variable name.
        variable: &'static str,
    },

    /// The assigned goal does not exist in the store.
    #[error("assigned goal not found: {goal_set_id}/{unique_name}")]
    GoalNotFound {
        /// The goal set id from the environment.
        goal_set_id: String,
        /// The unique name from the environment.
        unique_name: String,
    },

    /// Handling the synthesized event failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl IsolatedGoalEnv {
    /// Reads the assignment from the process environment.
    ///
    /// Returns `None` when this process is not an isolated worker.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::IncompleteEnv` when the isolated-goal marker
    /// is set but the goal coordinates are missing.
    pub fn from_env() -> Result<Option<Self>, WorkerError> {
        if std::env::var(env::ISOLATED_GOAL).map_or(true, |v| v != "true") {
            return Ok(None);
        }
        let goal_set_id = std::env::var(env::GOAL_SET_ID).map_err(|_| {
            WorkerError::IncompleteEnv {
                variable: env::GOAL_SET_ID,
            }
        })?;
        let unique_name = std::env::var(env::GOAL_UNIQUE_NAME).map_err(|_| {
            WorkerError::IncompleteEnv {
                variable: env::GOAL_UNIQUE_NAME,
            }
        })?;
        Ok(Some(Self {
            goal_set_id,
            unique_name,
            correlation_id: std::env::var(env::CORRELATION_ID).ok(),
            workspace_id: std::env::var(env::GOAL_TEAM).ok(),
            workspace_name: std::env::var(env::GOAL_TEAM_NAME).ok(),
        }))
    }
}

/// Fulfills the assigned goal and returns the worker exit code.
///
/// Always `0` when the event was processed: the goal outcome travels
/// through the store, not the exit code, and a success exit keeps the Job
/// scheduler from retrying.
///
/// # Errors
///
/// Returns a [`WorkerError`] when the goal cannot be located or the store
/// is unreachable.
pub async fn run_isolated_goal(
    ctx: &SdmContext,
    assignment: &IsolatedGoalEnv,
) -> Result<i32, WorkerError> {
    info!(
        goal_set_id = %assignment.goal_set_id,
        goal = %assignment.unique_name,
        "isolated worker starting"
    );

    let goal = ctx
        .store
        .goal(&assignment.goal_set_id, &assignment.unique_name)
        .await
        .map_err(HandlerError::from)?
        .ok_or_else(|| WorkerError::GoalNotFound {
            goal_set_id: assignment.goal_set_id.clone(),
            unique_name: assignment.unique_name.clone(),
        })?;

    // The daemon parks the goal `in_process` with phase `scheduled` before
    // the worker starts; both shapes are ours to fulfill.
    let dispatchable = goal.state == GoalState::Requested || goal.state == GoalState::InProcess;
    if !dispatchable {
        warn!(
            goal = %goal.unique_name,
            state = %goal.state,
            "assigned goal is no longer pending, exiting"
        );
        return Ok(0);
    }

    // Synthesized in-memory event; only the dispatcher handler runs.
    on_requested(ctx, goal).await?;

    info!(
        goal_set_id = %assignment.goal_set_id,
        goal = %assignment.unique_name,
        "isolated worker done"
    );
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment-variable parsing is covered here; the end-to-end worker
    // path runs through the dispatcher tests with a synthesized context.

    #[test]
    fn absent_marker_means_daemon_mode() {
        // The test process does not set the isolated-goal marker.
        assert!(IsolatedGoalEnv::from_env().unwrap().is_none());
    }
}
