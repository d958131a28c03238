//! Environment variables shared between the daemon and isolated workers.
//!
//! The subprocess and Kubernetes schedulers set these on the worker they
//! launch; the worker bootstrap reads them back to locate the one goal it
//! fulfills.

/// Set to `true` in a worker that fulfills exactly one goal.
pub const ISOLATED_GOAL: &str = "ATOMIST_ISOLATED_GOAL";

/// Set to `true` in the init container that clones the repository.
pub const ISOLATED_GOAL_INIT: &str = "ATOMIST_ISOLATED_GOAL_INIT";

/// Goal set id of the goal the worker fulfills.
pub const GOAL_SET_ID: &str = "ATOMIST_GOAL_SET_ID";

/// Unique name of the goal the worker fulfills.
pub const GOAL_UNIQUE_NAME: &str = "ATOMIST_GOAL_UNIQUE_NAME";

/// Opaque id of the goal event, when the store assigns one.
pub const GOAL_ID: &str = "ATOMIST_GOAL_ID";

/// Workspace id the goal belongs to.
pub const GOAL_TEAM: &str = "ATOMIST_GOAL_TEAM";

/// Human-readable workspace name.
pub const GOAL_TEAM_NAME: &str = "ATOMIST_GOAL_TEAM_NAME";

/// Correlation id of the triggering event.
pub const CORRELATION_ID: &str = "ATOMIST_CORRELATION_ID";

/// Overrides the configured SDM deployment name.
pub const DEPLOYMENT_NAME: &str = "ATOMIST_DEPLOYMENT_NAME";

/// Overrides the configured SDM deployment namespace.
pub const DEPLOYMENT_NAMESPACE: &str = "ATOMIST_DEPLOYMENT_NAMESPACE";
