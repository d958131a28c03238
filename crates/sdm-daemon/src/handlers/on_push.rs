//! Push handler: plan, sign, store and announce the goal set.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use sdm_core::goal::GoalSetRecord;
use sdm_core::push::{Commit, Committer, Push, RepoRef};

use super::HandlerError;
use crate::context::SdmContext;
use crate::listeners::broadcast;
use crate::status::{status_context, CommitStatus};

/// Plans the goal set for a push and publishes it.
///
/// When no rule matches, nothing is stored and no status is published.
///
/// # Errors
///
/// Transient failures only; see [`HandlerError`].
pub async fn on_push(ctx: &SdmContext, push: Push) -> Result<(), HandlerError> {
    let correlation_id = Uuid::new_v4().to_string();
    let push_ctx = ctx.push_context(push).await?;

    let Some(mut set) = ctx.planner.plan(&push_ctx, Some(&correlation_id)).await? else {
        return Ok(());
    };

    if let Some(signer) = &ctx.signer {
        for goal in &mut set.goals {
            signer.attach(goal)?;
        }
    }
    for goal in &set.goals {
        ctx.store.store_goal(goal).await?;
    }
    let record = GoalSetRecord::from_set(&set, Utc::now().timestamp_millis());
    ctx.store.store_goal_set(&record).await?;

    broadcast("goals-set", &ctx.listeners.goals_set, |l| {
        let set = set.clone();
        async move { l.on_goals_set(&set).await }
    })
    .await;

    ctx.status
        .publish(
            &set.repo,
            &set.sha,
            &CommitStatus {
                context: status_context(&ctx.registration.name),
                description: format!("Planned {} goals", set.goals.len()),
                target_url: None,
                state: sdm_core::goal::ExternalStatusState::Pending,
            },
        )
        .await?;

    info!(
        goal_set_id = %set.goal_set_id,
        goals = set.goals.len(),
        "goal set published"
    );
    Ok(())
}

/// Handles the first push to a repository.
///
/// The push event for a brand-new repository lacks branch context; the
/// handler synthesizes a push on the repository default branch. Without a
/// known default branch nothing fires.
///
/// # Errors
///
/// Transient failures only; see [`HandlerError`].
pub async fn on_first_push(
    ctx: &SdmContext,
    repo: RepoRef,
    default_branch: Option<String>,
    sha: &str,
) -> Result<(), HandlerError> {
    let Some(branch) = default_branch else {
        debug!(repo = %repo, "first push without a default branch, ignoring");
        return Ok(());
    };

    let push = Push {
        repo,
        branch,
        before: "0".repeat(40),
        after: sha.to_string(),
        default_branch: true,
        commits: vec![Commit {
            sha: sha.to_string(),
            message: String::new(),
        }],
        committer: Committer {
            login: String::new(),
            email: None,
        },
    };
    on_push(ctx, push).await
}
