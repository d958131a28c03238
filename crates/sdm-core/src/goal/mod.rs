//! Goal templates, goal events, goal sets and the goal state machine.
//!
//! A [`Goal`] is a declarative template for one delivery step. Planning a
//! push instantiates each applicable template into an [`SdmGoalEvent`] bound
//! to a specific `(sha, goal_set_id)`; the events of one push form a
//! [`GoalSet`] whose precondition edges make up a [`graph::DependencyGraph`].

mod error;
mod event;
pub mod graph;
mod set;
mod state;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use error::GoalError;
pub use event::{ExternalUrl, Fulfillment, FulfillmentMethod, Provenance, SdmGoalEvent};
pub use set::{GoalSet, GoalSetRecord, GoalSetState};
pub use state::{ExternalStatusState, GoalState};

/// Identifies a goal within a set by `(environment, unique_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoalKey {
    /// The environment tag, e.g. `0-code` or `1-staging`.
    pub environment: String,
    /// The stable unique name of the goal.
    #[serde(rename = "uniqueName")]
    pub unique_name: String,
}

impl GoalKey {
    /// Creates a goal key.
    pub fn new(environment: impl Into<String>, unique_name: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            unique_name: unique_name.into(),
        }
    }
}

impl std::fmt::Display for GoalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.environment, self.unique_name)
    }
}

/// A declarative delivery step template.
///
/// Templates carry everything that is stable across pushes: identity,
/// descriptions, approval and retry flags, and the keys of the goals that
/// must succeed first. Instantiation into an [`SdmGoalEvent`] happens at
/// planning time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Stable unique name of the goal.
    pub unique_name: String,

    /// Environment tag grouping goals of one delivery stage.
    pub environment: String,

    /// Human description shown while no state-specific template matches.
    pub description: String,

    /// Description templates per state, keyed by the state wire name.
    #[serde(default)]
    pub descriptions: BTreeMap<String, String>,

    /// Whether a failed instance may be re-requested.
    #[serde(default)]
    pub retry_feasible: bool,

    /// Whether the finished execution requires human approval.
    #[serde(default)]
    pub approval_required: bool,

    /// Whether the goal requires human approval before it is requested.
    #[serde(default)]
    pub pre_approval_required: bool,

    /// Whether skipped preconditions count as satisfied.
    #[serde(default)]
    pub skip_cascade: bool,

    /// Whether the goal should run in an isolated worker.
    #[serde(default)]
    pub isolated: bool,

    /// Goals that must reach `success` before this goal may be requested.
    #[serde(default)]
    pub preconditions: Vec<GoalKey>,
}

impl Goal {
    /// Starts building a goal template.
    pub fn builder(
        unique_name: impl Into<String>,
        environment: impl Into<String>,
    ) -> GoalBuilder {
        GoalBuilder {
            goal: Self {
                unique_name: unique_name.into(),
                environment: environment.into(),
                description: String::new(),
                descriptions: BTreeMap::new(),
                retry_feasible: false,
                approval_required: false,
                pre_approval_required: false,
                skip_cascade: false,
                isolated: false,
                preconditions: Vec::new(),
            },
        }
    }

    /// Returns the key identifying this goal within a set.
    #[must_use]
    pub fn key(&self) -> GoalKey {
        GoalKey::new(self.environment.clone(), self.unique_name.clone())
    }

    /// Returns `true` if `upstream` is a direct precondition of this goal.
    #[must_use]
    pub fn depends_on(&self, upstream: &GoalKey) -> bool {
        self.preconditions.contains(upstream)
    }

    /// Returns the description to display for a goal in `state`.
    ///
    /// Falls back to the template-wide description when no state-specific
    /// template is configured.
    #[must_use]
    pub fn description_for(&self, state: GoalState) -> &str {
        self.descriptions
            .get(state.as_str())
            .map_or(self.description.as_str(), String::as_str)
    }
}

/// Builder for [`Goal`] templates.
#[derive(Debug)]
pub struct GoalBuilder {
    goal: Goal,
}

impl GoalBuilder {
    /// Sets the default human description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.goal.description = description.into();
        self
    }

    /// Adds a description template for one state.
    #[must_use]
    pub fn description_for(mut self, state: GoalState, template: impl Into<String>) -> Self {
        self.goal
            .descriptions
            .insert(state.as_str().to_string(), template.into());
        self
    }

    /// Marks failed instances as re-requestable.
    #[must_use]
    pub const fn retry_feasible(mut self) -> Self {
        self.goal.retry_feasible = true;
        self
    }

    /// Requires human approval after execution.
    #[must_use]
    pub const fn approval_required(mut self) -> Self {
        self.goal.approval_required = true;
        self
    }

    /// Requires human approval before the goal is requested.
    #[must_use]
    pub const fn pre_approval_required(mut self) -> Self {
        self.goal.pre_approval_required = true;
        self
    }

    /// Lets skipped preconditions count as satisfied.
    #[must_use]
    pub const fn skip_cascade(mut self) -> Self {
        self.goal.skip_cascade = true;
        self
    }

    /// Runs the goal in an isolated worker.
    #[must_use]
    pub const fn isolated(mut self) -> Self {
        self.goal.isolated = true;
        self
    }

    /// Adds a precondition goal key.
    #[must_use]
    pub fn precondition(mut self, key: GoalKey) -> Self {
        self.goal.preconditions.push(key);
        self
    }

    /// Finishes the template.
    #[must_use]
    pub fn build(self) -> Goal {
        self.goal
    }
}
