//! Goal module error types.

use thiserror::Error;

use super::state::GoalState;

/// Errors that can occur during goal lifecycle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GoalError {
    /// Invalid goal state string.
    #[error("invalid goal state: {value}")]
    InvalidState {
        /// The invalid state string.
        value: String,
    },

    /// Invalid fulfillment method string.
    #[error("invalid fulfillment method: {value}")]
    InvalidFulfillmentMethod {
        /// The invalid method string.
        value: String,
    },

    /// State transition not allowed by the state machine.
    #[error("transition from {from} to {to} is not allowed for goal {unique_name}")]
    TransitionNotAllowed {
        /// The goal's unique name.
        unique_name: String,
        /// The current state.
        from: GoalState,
        /// The attempted target state.
        to: GoalState,
    },

    /// Two goals in one set share a `(environment, unique_name)` key.
    #[error("duplicate goal key {environment}/{unique_name} in planned set")]
    DuplicateGoalKey {
        /// The duplicated environment.
        environment: String,
        /// The duplicated unique name.
        unique_name: String,
    },

    /// The precondition graph contains a cycle.
    #[error("goal dependency cycle: {members}")]
    DependencyCycle {
        /// The goal keys participating in the cycle, joined by " -> ".
        members: String,
    },

    /// A precondition references a goal that is not part of the set.
    #[error("goal {unique_name} depends on {precondition}, which is not in the set")]
    UnknownPrecondition {
        /// The dependent goal's unique name.
        unique_name: String,
        /// The missing precondition key.
        precondition: String,
    },
}
