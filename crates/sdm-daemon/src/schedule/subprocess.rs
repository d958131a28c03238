//! Subprocess scheduler: forks the current binary as an isolated worker.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use super::{GoalScheduler, ScheduleError, ScheduleResult};
use crate::dispatch::GoalInvocation;
use crate::env;

/// Runs each isolated goal in a forked copy of this binary.
///
/// The worker re-enters through the isolated-goal bootstrap, fetches its
/// goal event by `(goal_set_id, unique_name)`, fulfills it, and exits 0.
pub struct SubprocessScheduler {
    config_path: Option<String>,
}

impl SubprocessScheduler {
    /// Creates a scheduler that passes `--config <path>` to workers.
    #[must_use]
    pub fn new(config_path: Option<String>) -> Self {
        Self { config_path }
    }
}

#[async_trait]
impl GoalScheduler for SubprocessScheduler {
    fn name(&self) -> &str {
        "subprocess"
    }

    fn supports(&self, invocation: &GoalInvocation) -> bool {
        invocation
            .template
            .as_ref()
            .is_some_and(|template| template.isolated)
    }

    async fn schedule(
        &self,
        invocation: &GoalInvocation,
    ) -> Result<ScheduleResult, ScheduleError> {
        let exe = std::env::current_exe()?;
        let mut command = Command::new(exe);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .env(env::ISOLATED_GOAL, "true")
            .env(env::GOAL_SET_ID, &invocation.goal.goal_set_id)
            .env(env::GOAL_UNIQUE_NAME, &invocation.goal.unique_name)
            .env(env::CORRELATION_ID, &invocation.correlation_id)
            .env(env::GOAL_TEAM, &invocation.workspace_id);
        if let Some(name) = &invocation.workspace_name {
            command.env(env::GOAL_TEAM_NAME, name);
        }
        if let Some(config) = &self.config_path {
            command.args(["--config", config]);
        }

        let mut child = command.spawn()?;
        info!(
            goal = %invocation.goal.unique_name,
            goal_set_id = %invocation.goal.goal_set_id,
            pid = child.id(),
            "launched isolated goal worker"
        );

        // Reap the worker in the background; its goal state travels through
        // the store, not the exit code.
        let goal = invocation.goal.unique_name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {},
                Ok(status) => warn!(goal = %goal, %status, "isolated worker exited abnormally"),
                Err(err) => warn!(goal = %goal, error = %err, "waiting for worker failed"),
            }
        });

        Ok(ScheduleResult::scheduled())
    }
}
