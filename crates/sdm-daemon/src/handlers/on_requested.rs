//! The fulfillment dispatcher: admission filters, scheduler consultation
//! and in-process execution for requested goals.

use chrono::Utc;
use tracing::{debug, info, warn};

use sdm_core::goal::{FulfillmentMethod, GoalState};
use sdm_core::SdmGoalEvent;

use super::HandlerError;
use crate::context::SdmContext;
use crate::dispatch::{execute_in_process, GoalInvocation};
use crate::progress::select_progress_log;
use crate::schedule::ScheduleResult;

/// Dispatches one requested goal.
///
/// Admission filters run in order: relevance, signature verification,
/// cancellation re-check, fulfillment-method arbitration. Execution or
/// scheduling failures are recorded on the goal; the handler still returns
/// `Ok` so the bus does not redeliver an event whose outcome is persisted.
///
/// # Errors
///
/// Transient store failures only.
pub async fn on_requested(ctx: &SdmContext, goal: SdmGoalEvent) -> Result<(), HandlerError> {
    // 1. Relevance: foreign side-effect goals are someone else's to run.
    match goal.fulfillment.method {
        FulfillmentMethod::SideEffect if !ctx.owns_side_effect(&goal.fulfillment.name) => {
            debug!(
                goal = %goal.unique_name,
                fulfillment = %goal.fulfillment.name,
                "ignoring foreign side-effect goal"
            );
            return Ok(());
        },
        FulfillmentMethod::Other => {
            let mut rejected = goal.clone();
            rejected.force_state(
                GoalState::Failure,
                "No fulfillment",
                Utc::now().timestamp_millis(),
            );
            ctx.store.store_goal(&rejected).await?;
            return Ok(());
        },
        FulfillmentMethod::Sdm | FulfillmentMethod::SideEffect => {},
    }

    // 2. Signature verification.
    if let Some(verifier) = &ctx.verifier {
        if let Err(failure) = verifier.verify(&goal) {
            warn!(
                goal = %goal.unique_name,
                goal_set_id = %goal.goal_set_id,
                reason = %failure,
                "rejecting goal"
            );
            let mut rejected = goal.clone();
            rejected.force_state(
                GoalState::Failure,
                failure.rejection_description(),
                Utc::now().timestamp_millis(),
            );
            ctx.store.store_goal(&rejected).await?;
            return Ok(());
        }
    }

    // 3. Cancellation re-check against the stored set. A goal parked in
    // `in_process` with phase `scheduled` is still dispatchable: that is
    // the shape an isolated worker (or a redelivered event) finds it in,
    // and rescheduling replaces the Job instead of duplicating it.
    let stored = ctx
        .store
        .goal(&goal.goal_set_id, &goal.unique_name)
        .await?;
    if let Some(stored) = stored {
        let dispatchable = stored.state == GoalState::Requested
            || (stored.state == GoalState::InProcess
                && stored.phase.as_deref() == Some("scheduled"));
        if !dispatchable {
            debug!(
                goal = %goal.unique_name,
                state = %stored.state,
                "goal moved on since requested, skipping"
            );
            return Ok(());
        }
    }

    // 4. Resolve the implementation.
    let Some(implementation) = ctx.registry.resolve(&goal) else {
        let mut rejected = goal.clone();
        rejected.force_state(
            GoalState::Failure,
            "No fulfillment",
            Utc::now().timestamp_millis(),
        );
        ctx.store.store_goal(&rejected).await?;
        return Ok(());
    };

    let progress_log = select_progress_log(
        ctx.progress_logs.as_deref(),
        &goal,
    );
    let invocation = GoalInvocation {
        template: Some(implementation.goal.clone()),
        goal,
        registration: ctx.registration.clone(),
        workspace_id: ctx.workspace_id.clone(),
        workspace_name: ctx.workspace_name.clone(),
        correlation_id: uuid::Uuid::new_v4().to_string(),
        progress_log,
    };

    // 5. Scheduler consultation: the first scheduler that supports the
    // invocation takes over.
    for scheduler in &ctx.schedulers {
        if !scheduler.supports(&invocation) {
            continue;
        }
        info!(
            goal = %invocation.goal.unique_name,
            scheduler = scheduler.name(),
            "scheduling goal"
        );
        let result = match scheduler.schedule(&invocation).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    goal = %invocation.goal.unique_name,
                    error = %err,
                    "scheduler failed"
                );
                ScheduleResult {
                    code: 1,
                    description: Some("Failed to schedule goal".to_string()),
                    ..ScheduleResult::default()
                }
            },
        };
        record_schedule_outcome(ctx, &invocation, result).await?;
        return Ok(());
    }

    // 6. No scheduler claimed it: execute in-process.
    execute_in_process(ctx.store.as_ref(), &invocation, &implementation).await?;
    Ok(())
}

async fn record_schedule_outcome(
    ctx: &SdmContext,
    invocation: &GoalInvocation,
    result: ScheduleResult,
) -> Result<(), HandlerError> {
    let mut goal = invocation.goal.clone();
    let ts = Utc::now().timestamp_millis();

    if result.code == 0 {
        // The worker publishes the real terminal state later.
        if goal.transition(GoalState::InProcess, ts).is_ok() {
            goal.phase = result.phase.or_else(|| Some("scheduled".to_string()));
            if let Some(description) = result.description {
                goal.description = description;
            }
            // The worker re-verifies what it fetches from the store.
            if let Some(signer) = &ctx.signer {
                signer.attach(&mut goal)?;
            }
            ctx.store.store_goal(&goal).await?;
        }
    } else {
        goal.force_state(
            result.state.unwrap_or(GoalState::Failure),
            result
                .description
                .unwrap_or_else(|| "Failed to schedule goal".to_string()),
            ts,
        );
        ctx.store.store_goal(&goal).await?;
    }
    Ok(())
}

/// Admission result for tests and the worker bootstrap: `true` when the
/// goal belongs to this registration.
#[must_use]
pub(crate) fn is_relevant(ctx: &SdmContext, goal: &SdmGoalEvent) -> bool {
    match goal.fulfillment.method {
        FulfillmentMethod::Sdm => true,
        FulfillmentMethod::SideEffect => ctx.owns_side_effect(&goal.fulfillment.name),
        FulfillmentMethod::Other => false,
    }
}
