//! Admin surface backing the chat verbs: goal-set listing and
//! cancellation, deploy toggles, and approvals.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use sdm_core::goal::{GoalState, Provenance};
use sdm_core::push::{PushContext, PushTest, PushTestError, RepoRef};
use sdm_core::sign::GoalSigner;

use crate::cancel::CancellationService;
use crate::dispatch::RegistrationInfo;
use crate::store::{GoalStore, StoreError};

/// Preference key for per-repository deploy enablement.
#[must_use]
pub fn deploy_preference_key(repo: &RepoRef) -> String {
    format!("deploy-enabled/{}/{}", repo.owner, repo.name)
}

/// Admin operations for this registration.
pub struct AdminService {
    store: Arc<dyn GoalStore>,
    registration: RegistrationInfo,
    cancellation: CancellationService,
    signer: Option<Arc<GoalSigner>>,
}

impl AdminService {
    /// Creates the admin service.
    #[must_use]
    pub fn new(store: Arc<dyn GoalStore>, registration: RegistrationInfo) -> Self {
        let cancellation = CancellationService::new(store.clone(), registration.name.clone());
        Self {
            store,
            registration,
            cancellation,
            signer: None,
        }
    }

    /// Signs goals the admin surface re-publishes; required when goal
    /// signing is enabled, as a pre-approved goal re-enters the
    /// dispatcher.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<GoalSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Returns the cancellation service.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationService {
        &self.cancellation
    }

    /// Renders the pending goal sets, one line per set.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_goal_sets(&self) -> Result<Vec<String>, StoreError> {
        let pending = self.cancellation.pending_sets().await?;
        Ok(pending
            .iter()
            .map(|record| {
                format!(
                    "{} {}@{} {} ({} goals)",
                    record.goal_set_id,
                    record.branch,
                    record.repo,
                    &record.sha[..record.sha.len().min(7)],
                    record.goals.len()
                )
            })
            .collect())
    }

    /// Enables deploys for a repository.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn enable_deploy(&self, repo: &RepoRef) -> Result<(), StoreError> {
        info!(repo = %repo, "enabling deploy");
        self.store
            .set_preference(&deploy_preference_key(repo), true)
            .await
    }

    /// Disables deploys for a repository.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn disable_deploy(&self, repo: &RepoRef) -> Result<(), StoreError> {
        info!(repo = %repo, "disabling deploy");
        self.store
            .set_preference(&deploy_preference_key(repo), false)
            .await
    }

    fn approval_provenance(&self, user_id: &str) -> Provenance {
        Provenance {
            registration: self.registration.name.clone(),
            version: self.registration.version.clone(),
            name: "approve-goal".to_string(),
            ts: Utc::now().timestamp_millis(),
            user_id: Some(user_id.to_string()),
            channel_id: None,
            correlation_id: None,
        }
    }

    /// Approves a goal waiting for approval; it terminalizes to `success`
    /// carrying the approval provenance.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the goal does not exist or is not
    /// waiting for approval.
    pub async fn approve(
        &self,
        goal_set_id: &str,
        unique_name: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let mut goal = self
            .store
            .goal(goal_set_id, unique_name)
            .await?
            .filter(|g| g.state == GoalState::WaitingForApproval)
            .ok_or_else(|| StoreError::NotFound {
                entity: "goal waiting for approval",
                id: format!("{goal_set_id}/{unique_name}"),
            })?;

        let ts = Utc::now().timestamp_millis();
        goal.approval = Some(self.approval_provenance(user_id));
        if goal.transition(GoalState::Approved, ts).is_ok() {
            // Approval is the terminal gate; the goal ends successful.
            let _ = goal.transition(GoalState::Success, ts + 1);
        }
        info!(goal = %unique_name, goal_set_id, user = user_id, "goal approved");
        self.store.store_goal(&goal).await
    }

    /// Stops an in-process goal short of success.
    ///
    /// The goal terminalizes as `stopped`; the completion reactor maps
    /// that onto a failed external status. In-flight executor work is not
    /// killed, only the recorded outcome changes.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the goal does not exist or is not in
    /// process.
    pub async fn stop_goal(
        &self,
        goal_set_id: &str,
        unique_name: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let mut goal = self
            .store
            .goal(goal_set_id, unique_name)
            .await?
            .filter(|g| g.state == GoalState::InProcess)
            .ok_or_else(|| StoreError::NotFound {
                entity: "goal in process",
                id: format!("{goal_set_id}/{unique_name}"),
            })?;

        let ts = Utc::now().timestamp_millis();
        if goal.transition(GoalState::Stopped, ts).is_ok() {
            goal.description = format!("Stopped: {}", goal.description);
        }
        info!(goal = %unique_name, goal_set_id, user = user_id, "goal stopped");
        self.store.store_goal(&goal).await
    }

    /// Pre-approves a goal so the dispatcher may pick it up.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the goal does not exist or is not
    /// waiting for pre-approval.
    pub async fn pre_approve(
        &self,
        goal_set_id: &str,
        unique_name: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let mut goal = self
            .store
            .goal(goal_set_id, unique_name)
            .await?
            .filter(|g| g.state == GoalState::WaitingForPreApproval)
            .ok_or_else(|| StoreError::NotFound {
                entity: "goal waiting for pre-approval",
                id: format!("{goal_set_id}/{unique_name}"),
            })?;

        let ts = Utc::now().timestamp_millis();
        goal.pre_approval = Some(self.approval_provenance(user_id));
        if goal.transition(GoalState::PreApproved, ts).is_ok() {
            let _ = goal.transition(GoalState::Requested, ts + 1);
        }
        if let Some(signer) = &self.signer {
            signer.attach(&mut goal).map_err(|err| StoreError::Unavailable {
                message: format!("signing pre-approved goal failed: {err}"),
            })?;
        }
        info!(goal = %unique_name, goal_set_id, user = user_id, "goal pre-approved");
        self.store.store_goal(&goal).await
    }
}

/// Push test gating deploy goals on the per-repository preference.
pub struct DeployEnabled {
    store: Arc<dyn GoalStore>,
}

impl DeployEnabled {
    /// Creates the predicate over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn GoalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PushTest for DeployEnabled {
    fn name(&self) -> &str {
        "deployEnabled"
    }

    async fn test(&self, ctx: &PushContext) -> Result<bool, PushTestError> {
        self.store
            .preference(&deploy_preference_key(&ctx.push.repo))
            .await
            .map_err(PushTestError::lookup)
    }
}
