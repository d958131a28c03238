//! Goal lifecycle state types and transitions.

use serde::{Deserialize, Serialize};

use super::error::GoalError;

/// The lifecycle state of a goal event.
///
/// Terminal states are `Success`, `Failure`, `Skipped`, `Stopped` and
/// `Canceled`. No transition leaves a terminal state except the explicit
/// retry `Failure -> Requested` (and `Skipped -> Requested` when an upstream
/// success re-evaluates candidacy), which only the precondition engine may
/// initiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum GoalState {
    /// Planned but waiting for preconditions.
    Planned,
    /// Ready for a fulfillment to pick it up.
    Requested,
    /// Waiting for a human pre-approval before it may be requested.
    WaitingForPreApproval,
    /// Pre-approval granted; about to be requested.
    PreApproved,
    /// Waiting for a human approval of the finished execution.
    WaitingForApproval,
    /// Approval granted; about to terminalize.
    Approved,
    /// A fulfillment is executing the goal.
    InProcess,
    /// The goal completed successfully.
    Success,
    /// The goal failed.
    Failure,
    /// The goal was skipped for this push.
    Skipped,
    /// The executor stopped the goal deliberately short of success.
    Stopped,
    /// The goal set was canceled before the goal reached a terminal state.
    Canceled,
}

impl GoalState {
    /// Parses a goal state from its wire representation.
    ///
    /// # Errors
    ///
    /// Returns `GoalError::InvalidState` if the string is not a recognized
    /// state.
    pub fn parse(s: &str) -> Result<Self, GoalError> {
        match s {
            "planned" => Ok(Self::Planned),
            "requested" => Ok(Self::Requested),
            "waiting_for_pre_approval" => Ok(Self::WaitingForPreApproval),
            "pre_approved" => Ok(Self::PreApproved),
            "waiting_for_approval" => Ok(Self::WaitingForApproval),
            "approved" => Ok(Self::Approved),
            "in_process" => Ok(Self::InProcess),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "skipped" => Ok(Self::Skipped),
            "stopped" => Ok(Self::Stopped),
            "canceled" => Ok(Self::Canceled),
            _ => Err(GoalError::InvalidState {
                value: s.to_string(),
            }),
        }
    }

    /// Returns the wire representation of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Requested => "requested",
            Self::WaitingForPreApproval => "waiting_for_pre_approval",
            Self::PreApproved => "pre_approved",
            Self::WaitingForApproval => "waiting_for_approval",
            Self::Approved => "approved",
            Self::InProcess => "in_process",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
            Self::Stopped => "stopped",
            Self::Canceled => "canceled",
        }
    }

    /// Returns `true` if this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Skipped | Self::Stopped | Self::Canceled
        )
    }

    /// Returns `true` if a goal in this state may be re-evaluated as a
    /// candidate when an upstream goal succeeds.
    ///
    /// `Failure` candidacy additionally requires the goal to be retry
    /// feasible; that flag lives on the goal event, not the state.
    #[must_use]
    pub const fn is_candidate_source(&self) -> bool {
        matches!(self, Self::Planned | Self::Skipped | Self::Failure)
    }

    /// Checks whether transitioning from this state to `next` is permitted.
    ///
    /// The permitted transitions form a directed graph:
    ///
    /// ```text
    /// planned                  -> requested | waiting_for_pre_approval | skipped
    /// waiting_for_pre_approval -> pre_approved -> requested
    /// requested                -> in_process
    /// in_process               -> success | failure | waiting_for_approval | stopped
    /// waiting_for_approval     -> approved -> success | failure
    /// failure | skipped        -> requested        (retry / re-evaluation)
    /// any non-terminal         -> canceled
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        // Cancellation is permitted from every non-terminal state.
        if next == Self::Canceled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Self::Planned, Self::Requested)
                | (Self::Planned, Self::WaitingForPreApproval)
                | (Self::Planned, Self::Skipped)
                | (Self::WaitingForPreApproval, Self::PreApproved)
                | (Self::PreApproved, Self::Requested)
                | (Self::Requested, Self::InProcess)
                | (Self::InProcess, Self::Success)
                | (Self::InProcess, Self::Failure)
                | (Self::InProcess, Self::WaitingForApproval)
                | (Self::InProcess, Self::Stopped)
                | (Self::WaitingForApproval, Self::Approved)
                | (Self::Approved, Self::Success)
                | (Self::Approved, Self::Failure)
                | (Self::Failure, Self::Requested)
                | (Self::Skipped, Self::Requested)
        )
    }

    /// Maps this goal state onto the external commit-status state.
    #[must_use]
    pub const fn external_status(&self) -> ExternalStatusState {
        match self {
            Self::Planned
            | Self::Requested
            | Self::WaitingForPreApproval
            | Self::PreApproved
            | Self::WaitingForApproval
            | Self::Approved
            | Self::InProcess => ExternalStatusState::Pending,
            Self::Success => ExternalStatusState::Success,
            Self::Failure | Self::Skipped | Self::Stopped | Self::Canceled => {
                ExternalStatusState::Failure
            },
        }
    }
}

impl std::fmt::Display for GoalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state reported to the source-control commit status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatusState {
    /// Work is still pending for the SHA.
    Pending,
    /// Every goal for the SHA succeeded.
    Success,
    /// At least one goal failed, stopped, or was canceled.
    Failure,
}

impl ExternalStatusState {
    /// Returns the wire representation of this status state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}
