//! The event handlers: push planning, goal dispatch, the precondition
//! engine and the completion reactor.
//!
//! Handlers distinguish "the event was processed" from "the goal
//! succeeded": executor and scheduler failures are recorded on the goal and
//! the handler still returns `Ok`, so the bus does not redeliver events
//! whose outcome is already persisted. Only transient failures (store,
//! status endpoint, project loading) surface as handler errors.

mod on_completed;
mod on_push;
mod on_requested;
mod on_success;

use thiserror::Error;
use tracing::{error, info, warn};

use sdm_core::plan::PlanError;
use sdm_core::push::PushTestError;
use sdm_core::sign::SigningError;

use crate::bus::SdmEvent;
use crate::context::SdmContext;
use crate::jobs::JobTaskState;
use crate::listeners::broadcast;
use crate::status::StatusError;
use crate::store::StoreError;

pub use on_completed::on_completed;
pub use on_push::{on_first_push, on_push};
pub use on_requested::on_requested;
pub use on_success::on_success;

/// Errors that fail event processing; the bus redelivers the event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandlerError {
    /// The goal store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Planning failed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Loading the project or evaluating a push test failed.
    #[error(transparent)]
    Push(#[from] PushTestError),

    /// Signing an outbound goal event failed.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Publishing a commit status failed.
    #[error(transparent)]
    Status(#[from] StatusError),
}

/// Routes one bus event to its handler.
///
/// # Errors
///
/// Returns a [`HandlerError`] only for transient failures worth a retry.
pub async fn handle_event(ctx: &SdmContext, event: SdmEvent) -> Result<(), HandlerError> {
    match event {
        SdmEvent::Push(push) => on_push(ctx, push).await,
        SdmEvent::FirstPush {
            repo,
            default_branch,
            sha,
        } => on_first_push(ctx, repo, default_branch, &sha).await,
        SdmEvent::GoalRequested(goal) => on_requested(ctx, goal).await,
        SdmEvent::GoalSucceeded(goal) => on_success(ctx, &goal).await,
        SdmEvent::GoalCompleted(goal) => on_completed(ctx, &goal).await,
        SdmEvent::JobTask { job, task } => on_job_task(ctx, &job, &task).await,
        SdmEvent::ChannelJoined {
            channel_id,
            user_id,
            repo,
        } => {
            broadcast("channel-join", &ctx.listeners.channel_join, |l| {
                let channel_id = channel_id.clone();
                let user_id = user_id.clone();
                let repo = repo.clone();
                async move { l.on_joined(&channel_id, &user_id, repo.as_ref()).await }
            })
            .await;
            Ok(())
        },
        SdmEvent::SuccessStatus {
            context,
            repo,
            sha,
            target_url,
        } => {
            broadcast("success-status", &ctx.listeners.success_status, |l| {
                let context = context.clone();
                let repo = repo.clone();
                let sha = sha.clone();
                let target_url = target_url.clone();
                async move {
                    l.on_status(&context, &repo, &sha, target_url.as_deref())
                        .await
                }
            })
            .await;
            Ok(())
        },
    }
}

/// Marks a job task running, executes it, and records the outcome.
async fn on_job_task(
    ctx: &SdmContext,
    job: &crate::jobs::Job,
    task: &crate::jobs::JobTask,
) -> Result<(), HandlerError> {
    if task.state != JobTaskState::Created {
        return Ok(());
    }
    ctx.store
        .set_job_task_state(&job.id, &task.id, JobTaskState::Running, None)
        .await?;

    let (state, message) = ctx.job_tasks.run(task, job).await;
    ctx.store
        .set_job_task_state(&job.id, &task.id, state, message)
        .await?;
    Ok(())
}

/// Consumes `receiver` until it closes, dispatching every event.
///
/// Subscribe before publishing anything: a broadcast receiver only sees
/// events sent after it was created.
pub async fn run_event_loop(
    ctx: &SdmContext,
    mut receiver: tokio::sync::broadcast::Receiver<SdmEvent>,
) {
    info!(registration = %ctx.registration.name, "event loop started");
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if let Err(err) = handle_event(ctx, event).await {
                    error!(error = %err, "event handling failed");
                }
            },
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event loop lagged behind the bus");
            },
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    info!("event loop stopped");
}
