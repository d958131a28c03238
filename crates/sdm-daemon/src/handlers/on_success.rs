//! The state/precondition engine: advances dependents of a succeeded goal.

use chrono::Utc;
use tracing::{debug, info, warn};

use sdm_core::goal::GoalState;
use sdm_core::SdmGoalEvent;

use super::HandlerError;
use crate::context::SdmContext;
use crate::store::goal_set_of;

/// Re-evaluates candidacy across the set after `succeeded` reached
/// `success`.
///
/// Candidates are goals in `planned`, `skipped`, or retry-feasible
/// `failure` whose preconditions all resolve to `success` (or `skipped`
/// under skip-cascade) within the same set. Candidates advance to
/// `waiting_for_pre_approval` when pre-approval is required, otherwise to
/// `requested` after the fulfillment callbacks enriched their data.
///
/// # Errors
///
/// Transient store failures only.
pub async fn on_success(ctx: &SdmContext, succeeded: &SdmGoalEvent) -> Result<(), HandlerError> {
    let set = goal_set_of(ctx.store.as_ref(), succeeded).await?;
    let ts = Utc::now().timestamp_millis();

    for goal in &set.goals {
        if goal.key() == succeeded.key() {
            continue;
        }
        if !is_candidate(goal) {
            continue;
        }
        let skip_cascade = ctx
            .registry
            .template(&goal.unique_name)
            .map_or(false, |template| template.skip_cascade);
        if !set.preconditions_met(goal, skip_cascade) {
            debug!(goal = %goal.unique_name, "preconditions not yet met");
            continue;
        }

        let mut advanced = goal.clone();
        if goal.pre_approval_required && goal.state == GoalState::Planned {
            if advanced
                .transition(GoalState::WaitingForPreApproval, ts)
                .is_err()
            {
                continue;
            }
        } else {
            // Callbacks may enrich the data payload before the goal is
            // requested.
            if let Some(implementation) = ctx.registry.resolve(goal) {
                for callback in &implementation.callbacks {
                    match callback.enrich(&advanced).await {
                        Ok(Some(data)) => advanced.data = Some(data),
                        Ok(None) => {},
                        Err(err) => {
                            warn!(
                                goal = %goal.unique_name,
                                error = %err,
                                "fulfillment callback failed"
                            );
                        },
                    }
                }
            }
            if advanced.transition(GoalState::Requested, ts).is_err() {
                continue;
            }
        }

        if let Some(signer) = &ctx.signer {
            signer.attach(&mut advanced)?;
        }
        info!(
            goal = %advanced.unique_name,
            state = %advanced.state,
            upstream = %succeeded.unique_name,
            "advancing dependent goal"
        );
        ctx.store.store_goal(&advanced).await?;
    }
    Ok(())
}

/// Whether a goal may be re-evaluated as a candidate. Failed goals also
/// need the retry flag.
fn is_candidate(goal: &SdmGoalEvent) -> bool {
    goal.state.is_candidate_source()
        && (goal.state != GoalState::Failure || goal.retry_feasible)
}
