//! Push snapshots and the push-test predicate DSL.
//!
//! A [`Push`] is the immutable snapshot of one source-control push. Push
//! tests are composable boolean predicates over a [`PushContext`]; the
//! planner evaluates them to decide which goals apply to the push.

mod context;
mod error;
pub mod material;
mod project;

use serde::{Deserialize, Serialize};

pub use context::{ChangeLookup, GoalLookup, PushContext, ResourceProviderLookup};
pub use error::PushTestError;
pub use material::MaterialChangeOptions;
pub use project::{LocalProject, LocalProjectLoader, Project, ProjectLoader};
pub use test::{evaluate, PushTest, PushTestNode, PushTestRegistry};

/// Repository coordinates within a source-control provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRef {
    /// Owning organization or user.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Id of the source-control provider hosting the repository.
    pub provider_id: String,
}

impl RepoRef {
    /// Creates repository coordinates.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            provider_id: provider_id.into(),
        }
    }

    /// Renders the canonical `owner/name/providerId` form.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}/{}/{}", self.owner, self.name, self.provider_id)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The identity that made the commits of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committer {
    /// Login of the committer.
    pub login: String,
    /// Email address, when the provider exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One commit of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit SHA.
    pub sha: String,
    /// Commit message.
    pub message: String,
}

/// Snapshot of a source-control push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Push {
    /// Repository coordinates.
    pub repo: RepoRef,
    /// Branch that received the push.
    pub branch: String,
    /// Commit SHA the branch pointed to before the push.
    pub before: String,
    /// Commit SHA the branch points to after the push.
    pub after: String,
    /// Whether the branch is the repository default branch.
    pub default_branch: bool,
    /// The commits contained in the push, oldest first.
    #[serde(default)]
    pub commits: Vec<Commit>,
    /// The identity that made the push.
    pub committer: Committer,
}

/// Test fixtures shared by unit tests across the crate.
#[cfg(test)]
pub mod test_support {
    use super::{Commit, Committer, Push, RepoRef};

    /// A push to `octocat/hello/gh` on `main`.
    #[must_use]
    pub fn sample_push() -> Push {
        Push {
            repo: RepoRef::new("octocat", "hello", "gh"),
            branch: "main".to_string(),
            before: "4f1a6e3d2c5b8a7f9e0d1c2b3a4f5e6d7c8b9a0f".to_string(),
            after: "9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d".to_string(),
            default_branch: true,
            commits: vec![Commit {
                sha: "9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d".to_string(),
                message: "Add deployment manifest".to_string(),
            }],
            committer: Committer {
                login: "octocat".to_string(),
                email: Some("octocat@example.com".to_string()),
            },
        }
    }
}
