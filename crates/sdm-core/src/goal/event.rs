//! Goal event instances and their provenance.

use serde::{Deserialize, Serialize};

use super::error::GoalError;
use super::state::GoalState;
use super::{Goal, GoalKey};
use crate::push::{Push, RepoRef};

/// How a goal gets fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FulfillmentMethod {
    /// This SDM registration executes the goal.
    Sdm,
    /// Another registration executes the goal as a side effect.
    SideEffect,
    /// No fulfiller is assigned.
    Other,
}

impl FulfillmentMethod {
    /// Parses a fulfillment method from its wire representation.
    ///
    /// # Errors
    ///
    /// Returns `GoalError::InvalidFulfillmentMethod` for unknown values.
    pub fn parse(s: &str) -> Result<Self, GoalError> {
        match s {
            "sdm" => Ok(Self::Sdm),
            "side-effect" => Ok(Self::SideEffect),
            "other" => Ok(Self::Other),
            _ => Err(GoalError::InvalidFulfillmentMethod {
                value: s.to_string(),
            }),
        }
    }

    /// Returns the wire representation of this method.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sdm => "sdm",
            Self::SideEffect => "side-effect",
            Self::Other => "other",
        }
    }
}

/// The fulfillment assignment of a goal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    /// Name of the implementation or registration responsible.
    pub name: String,
    /// How the goal gets fulfilled.
    pub method: FulfillmentMethod,
}

impl Fulfillment {
    /// Creates a fulfillment executed by this registration.
    pub fn sdm(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: FulfillmentMethod::Sdm,
        }
    }

    /// Creates a side-effect fulfillment owned by `registration`.
    pub fn side_effect(registration: impl Into<String>) -> Self {
        Self {
            name: registration.into(),
            method: FulfillmentMethod::SideEffect,
        }
    }
}

/// One provenance entry: which registration touched the goal, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    /// Registration name that emitted the event.
    pub registration: String,
    /// Registration version.
    pub version: String,
    /// Name of the handler or person acting.
    pub name: String,
    /// Millisecond timestamp of the action.
    pub ts: i64,
    /// Acting chat user, if the action came from the chat surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Chat channel the action came from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Correlation id of the triggering event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Provenance {
    /// Renders this entry in its canonical form,
    /// `<registration>:<version>/<name>-<userId>-<channelId>-<ts>`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "{}:{}/{}-{}-{}-{}",
            self.registration,
            self.version,
            self.name,
            self.user_id.as_deref().unwrap_or("undefined"),
            self.channel_id.as_deref().unwrap_or("undefined"),
            self.ts
        )
    }
}

/// A link published alongside the goal, e.g. a build log or preview URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUrl {
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// The URL itself.
    pub url: String,
}

/// A goal instance for one `(sha, goal_set_id)`.
///
/// This is the unit that travels over the event bus and is persisted by the
/// external store. `(goal_set_id, environment, unique_name)` uniquely
/// identifies a goal within a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdmGoalEvent {
    /// Id of the goal set this event belongs to.
    pub goal_set_id: String,

    /// Stable unique name of the goal.
    pub unique_name: String,

    /// Environment tag of the goal.
    pub environment: String,

    /// Display name of the goal.
    pub name: String,

    /// Commit SHA the goal applies to.
    pub sha: String,

    /// Branch the push targeted.
    pub branch: String,

    /// Repository coordinates.
    pub repo: RepoRef,

    /// Current lifecycle state.
    pub state: GoalState,

    /// Human description for the current state.
    #[serde(default)]
    pub description: String,

    /// Execution phase detail, e.g. `scheduled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Millisecond timestamp of the last state change.
    pub ts: i64,

    /// Version counter, incremented on every update.
    pub version: u64,

    /// Keys of the goals that must succeed first.
    #[serde(default)]
    pub pre_conditions: Vec<GoalKey>,

    /// Who fulfills the goal, and how.
    pub fulfillment: Fulfillment,

    /// Opaque payload fulfillment callbacks may enrich.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// Primary log URL for the goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Additional links published by the executor.
    #[serde(default)]
    pub external_urls: Vec<ExternalUrl>,

    /// Every registration that touched this goal, in order.
    #[serde(default)]
    pub provenance: Vec<Provenance>,

    /// Approval provenance, once granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Provenance>,

    /// Pre-approval provenance, once granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_approval: Option<Provenance>,

    /// Whether a failed instance may be re-requested.
    #[serde(default)]
    pub retry_feasible: bool,

    /// Whether the finished execution requires human approval.
    #[serde(default)]
    pub approval_required: bool,

    /// Whether the goal requires approval before it is requested.
    #[serde(default)]
    pub pre_approval_required: bool,

    /// Base64 RSA-SHA512 signature over the canonical form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl SdmGoalEvent {
    /// Instantiates a goal template for one push.
    #[must_use]
    pub fn from_template(
        goal: &Goal,
        push: &Push,
        goal_set_id: &str,
        state: GoalState,
        fulfillment: Fulfillment,
        provenance: Provenance,
        ts: i64,
    ) -> Self {
        Self {
            goal_set_id: goal_set_id.to_string(),
            unique_name: goal.unique_name.clone(),
            environment: goal.environment.clone(),
            name: goal.unique_name.clone(),
            sha: push.after.clone(),
            branch: push.branch.clone(),
            repo: push.repo.clone(),
            state,
            description: goal.description_for(state).to_string(),
            phase: None,
            ts,
            version: 1,
            pre_conditions: goal.preconditions.clone(),
            fulfillment,
            data: None,
            url: None,
            external_urls: Vec::new(),
            provenance: vec![provenance],
            approval: None,
            pre_approval: None,
            retry_feasible: goal.retry_feasible,
            approval_required: goal.approval_required,
            pre_approval_required: goal.pre_approval_required,
            signature: None,
        }
    }

    /// Returns the key identifying this goal within its set.
    #[must_use]
    pub fn key(&self) -> GoalKey {
        GoalKey::new(self.environment.clone(), self.unique_name.clone())
    }

    /// Transitions the event to `to`, stamping `ts` and bumping the version.
    ///
    /// The signature is cleared; state changes must be re-signed before they
    /// are published.
    ///
    /// # Errors
    ///
    /// Returns `GoalError::TransitionNotAllowed` if the state machine forbids
    /// the transition.
    pub fn transition(&mut self, to: GoalState, ts: i64) -> Result<(), GoalError> {
        if !self.state.can_transition_to(to) {
            return Err(GoalError::TransitionNotAllowed {
                unique_name: self.unique_name.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.ts = ts;
        self.version += 1;
        self.signature = None;
        Ok(())
    }

    /// Returns `true` if `upstream` is a direct precondition of this goal.
    #[must_use]
    pub fn is_directly_dependent_on(&self, upstream: &GoalKey) -> bool {
        self.pre_conditions.contains(upstream)
    }

    /// Forces the event into `state`, bypassing the transition table.
    ///
    /// Reserved for the rejection path: a goal whose signature does not
    /// verify is marked `failure` directly from `requested`, which the
    /// regular transition table does not permit.
    pub fn force_state(&mut self, state: GoalState, description: impl Into<String>, ts: i64) {
        self.state = state;
        self.description = description.into();
        self.ts = ts;
        self.version += 1;
        self.signature = None;
    }
}
