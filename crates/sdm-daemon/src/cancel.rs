//! Goal-set cancellation.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use sdm_core::goal::{GoalSet, GoalSetRecord, GoalSetState, GoalState};

use crate::store::{GoalStore, StoreError};

/// Lists and cancels still-pending goal sets for one registration.
pub struct CancellationService {
    store: Arc<dyn GoalStore>,
    registration: String,
}

impl CancellationService {
    /// Creates the service for `registration`.
    #[must_use]
    pub fn new(store: Arc<dyn GoalStore>, registration: impl Into<String>) -> Self {
        Self {
            store,
            registration: registration.into(),
        }
    }

    /// Lists the in-process goal sets planned by this registration.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn pending_sets(&self) -> Result<Vec<GoalSetRecord>, StoreError> {
        self.store.pending_goal_sets(&self.registration).await
    }

    /// Cancels one goal set.
    ///
    /// Idempotent: goals already in a terminal state are left untouched;
    /// every non-terminal goal becomes `canceled`. The set record is
    /// re-emitted with state `canceled`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cancel_set(&self, goal_set_id: &str) -> Result<(), StoreError> {
        let goals = self.store.goals_for_set(goal_set_id).await?;
        if goals.is_empty() {
            return Err(StoreError::NotFound {
                entity: "goal set",
                id: goal_set_id.to_string(),
            });
        }

        let ts = Utc::now().timestamp_millis();
        let mut canceled = 0usize;
        for goal in &goals {
            if goal.state.is_terminal() {
                continue;
            }
            let mut update = goal.clone();
            if update.transition(GoalState::Canceled, ts).is_ok() {
                update.description = format!("Canceled: {}", update.description);
                self.store.store_goal(&update).await?;
                canceled += 1;
            }
        }

        // Re-read so the record caches the post-cancellation derived state.
        let goals = self.store.goals_for_set(goal_set_id).await?;
        let set = GoalSet {
            goal_set_id: goal_set_id.to_string(),
            sha: goals[0].sha.clone(),
            branch: goals[0].branch.clone(),
            repo: goals[0].repo.clone(),
            goals,
        };
        let mut record = GoalSetRecord::from_set(&set, ts);
        if canceled > 0 {
            record.state = GoalSetState::Canceled;
        }
        self.store.store_goal_set(&record).await?;

        info!(goal_set_id, canceled, "goal set canceled");
        Ok(())
    }

    /// Cancels every pending goal set of this registration.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cancel_all(&self) -> Result<usize, StoreError> {
        let pending = self.pending_sets().await?;
        let count = pending.len();
        for record in pending {
            self.cancel_set(&record.goal_set_id).await?;
        }
        Ok(count)
    }
}
