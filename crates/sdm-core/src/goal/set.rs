//! Goal sets and their derived state.

use serde::{Deserialize, Serialize};

use super::event::SdmGoalEvent;
use super::state::GoalState;
use super::GoalKey;
use crate::push::RepoRef;

/// The derived state of a goal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSetState {
    /// At least one goal has not reached a terminal state.
    InProcess,
    /// Every goal succeeded.
    Success,
    /// All goals are terminal and at least one failed or stopped.
    Failure,
    /// All goals are terminal and at least one was canceled.
    Canceled,
}

impl GoalSetState {
    /// Returns the wire representation of this set state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProcess => "in_process",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Canceled => "canceled",
        }
    }
}

/// All goals planned for one push, sharing a goal set id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSet {
    /// The shared goal set id.
    pub goal_set_id: String,
    /// Commit SHA the set applies to.
    pub sha: String,
    /// Branch the push targeted.
    pub branch: String,
    /// Repository coordinates.
    pub repo: RepoRef,
    /// The member goal events.
    pub goals: Vec<SdmGoalEvent>,
}

impl GoalSet {
    /// Returns the goal with the given key, if present.
    ///
    /// Keys are unique within a set, so ties cannot occur; lookups compare
    /// `(environment, unique_name)`.
    #[must_use]
    pub fn goal(&self, key: &GoalKey) -> Option<&SdmGoalEvent> {
        self.goals.iter().find(|g| g.key() == *key)
    }

    /// Returns all goals currently in `state`.
    #[must_use]
    pub fn goals_in_state(&self, state: GoalState) -> Vec<&SdmGoalEvent> {
        self.goals.iter().filter(|g| g.state == state).collect()
    }

    /// Derives the set state from the member goal states.
    ///
    /// The derived value is authoritative; the `state` field persisted on
    /// [`GoalSetRecord`] is only a cache of it.
    #[must_use]
    pub fn state(&self) -> GoalSetState {
        if self.goals.iter().any(|g| !g.state.is_terminal()) {
            return GoalSetState::InProcess;
        }
        if self.goals.iter().all(|g| g.state == GoalState::Success) {
            return GoalSetState::Success;
        }
        if self.goals.iter().any(|g| g.state == GoalState::Canceled) {
            return GoalSetState::Canceled;
        }
        GoalSetState::Failure
    }

    /// Returns `true` if every precondition of `goal` is satisfied within
    /// this set.
    ///
    /// A precondition is satisfied by a goal in `success`, or in `skipped`
    /// when the dependent goal cascades over skipped upstreams. A
    /// precondition naming a goal outside the set is never satisfied.
    #[must_use]
    pub fn preconditions_met(&self, goal: &SdmGoalEvent, skip_cascade: bool) -> bool {
        goal.pre_conditions.iter().all(|key| {
            self.goal(key).is_some_and(|upstream| {
                upstream.state == GoalState::Success
                    || (skip_cascade && upstream.state == GoalState::Skipped)
            })
        })
    }
}

/// The persisted record of a goal set, emitted to the external store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSetRecord {
    /// The shared goal set id.
    pub goal_set_id: String,
    /// Commit SHA the set applies to.
    pub sha: String,
    /// Branch the push targeted.
    pub branch: String,
    /// Repository coordinates.
    pub repo: RepoRef,
    /// Cached set state; the derived value wins when the two disagree.
    pub state: GoalSetState,
    /// The member goal keys.
    pub goals: Vec<GoalKey>,
    /// Millisecond timestamp of the last record update.
    pub ts: i64,
}

impl GoalSetRecord {
    /// Builds the record for `set`, caching its derived state.
    #[must_use]
    pub fn from_set(set: &GoalSet, ts: i64) -> Self {
        Self {
            goal_set_id: set.goal_set_id.clone(),
            sha: set.sha.clone(),
            branch: set.branch.clone(),
            repo: set.repo.clone(),
            state: set.state(),
            goals: set.goals.iter().map(SdmGoalEvent::key).collect(),
            ts,
        }
    }
}
