//! The goal-completion reactor: listeners and external status.

use tracing::{debug, info};

use sdm_core::goal::{ExternalStatusState, GoalSetState};
use sdm_core::SdmGoalEvent;

use super::on_requested::is_relevant;
use super::HandlerError;
use crate::context::SdmContext;
use crate::listeners::broadcast;
use crate::status::{status_context, CommitStatus};
use crate::store::goal_set_of;

/// Reacts to a goal reaching a terminal state.
///
/// Runs every completion listener with the full set, then publishes the
/// external status: `failure` linking the goal log as soon as one goal
/// maps to a failed status (failed, skipped, stopped or canceled),
/// `success` once every goal in the set succeeded.
///
/// # Errors
///
/// Transient store or status-endpoint failures only.
pub async fn on_completed(ctx: &SdmContext, completed: &SdmGoalEvent) -> Result<(), HandlerError> {
    if !is_relevant(ctx, completed) {
        debug!(
            goal = %completed.unique_name,
            "completed goal is not relevant to this registration"
        );
        return Ok(());
    }

    let set = goal_set_of(ctx.store.as_ref(), completed).await?;

    broadcast("goal-completion", &ctx.listeners.completion, |l| {
        let completed = completed.clone();
        let set = set.clone();
        let channels = ctx.channels.clone();
        async move {
            l.on_completion(&completed, &set, channels.as_ref())
                .await
        }
    })
    .await;

    if completed.state.external_status() == ExternalStatusState::Failure {
        ctx.status
            .publish(
                &set.repo,
                &set.sha,
                &CommitStatus {
                    context: status_context(&ctx.registration.name),
                    description: completed.description.clone(),
                    target_url: completed.url.clone(),
                    state: ExternalStatusState::Failure,
                },
            )
            .await?;
        info!(
            goal = %completed.unique_name,
            goal_set_id = %completed.goal_set_id,
            state = %completed.state,
            "published failure status"
        );
        return Ok(());
    }

    if set.state() == GoalSetState::Success {
        ctx.status
            .publish(
                &set.repo,
                &set.sha,
                &CommitStatus {
                    context: status_context(&ctx.registration.name),
                    description: "All goals succeeded".to_string(),
                    target_url: None,
                    state: ExternalStatusState::Success,
                },
            )
            .await?;
        info!(
            goal_set_id = %completed.goal_set_id,
            "goal set complete, published success status"
        );
    }
    Ok(())
}
