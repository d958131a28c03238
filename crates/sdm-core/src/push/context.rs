//! Evaluation context for push tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::error::PushTestError;
use super::project::Project;
use super::{Push, RepoRef};
use crate::goal::SdmGoalEvent;

/// Resolves the changed-file set of a push.
#[async_trait]
pub trait ChangeLookup: Send + Sync {
    /// Returns the paths changed between `before` and `after`.
    async fn changed_files(
        &self,
        repo: &RepoRef,
        before: &str,
        after: &str,
    ) -> Result<Vec<String>, PushTestError>;
}

/// Resolves prior goal events for a SHA.
#[async_trait]
pub trait GoalLookup: Send + Sync {
    /// Returns every goal event recorded for `(repo, sha)`.
    async fn goals_for_sha(
        &self,
        repo: &RepoRef,
        sha: &str,
    ) -> Result<Vec<SdmGoalEvent>, PushTestError>;
}

/// Resolves configured workspace resource providers.
#[async_trait]
pub trait ResourceProviderLookup: Send + Sync {
    /// Returns `true` if the workspace has a provider of `provider_type`
    /// (and, when given, with the exact `name`).
    async fn has_provider(
        &self,
        provider_type: &str,
        name: Option<&str>,
    ) -> Result<bool, PushTestError>;
}

/// Everything a push test may look at.
///
/// I/O-backed lookups (changed files, prior goals, file contents) are
/// memoized per context so that a test tree touching the same leaf twice
/// performs the I/O once. Re-evaluating a tree against the same context
/// therefore returns the same boolean.
pub struct PushContext {
    /// The push under evaluation.
    pub push: Push,
    project: Arc<dyn Project>,
    changes: Arc<dyn ChangeLookup>,
    goals: Arc<dyn GoalLookup>,
    providers: Arc<dyn ResourceProviderLookup>,
    memo: Mutex<Memo>,
}

#[derive(Default)]
struct Memo {
    changed_files: Option<Vec<String>>,
    goals: Option<Vec<SdmGoalEvent>>,
    contents: HashMap<String, String>,
}

impl PushContext {
    /// Creates a context for `push`.
    #[must_use]
    pub fn new(
        push: Push,
        project: Arc<dyn Project>,
        changes: Arc<dyn ChangeLookup>,
        goals: Arc<dyn GoalLookup>,
        providers: Arc<dyn ResourceProviderLookup>,
    ) -> Self {
        Self {
            push,
            project,
            changes,
            goals,
            providers,
            memo: Mutex::new(Memo::default()),
        }
    }

    /// Returns the project view at the pushed commit.
    #[must_use]
    pub fn project(&self) -> &dyn Project {
        self.project.as_ref()
    }

    /// Returns the changed-file set of the push, memoized.
    ///
    /// # Errors
    ///
    /// Propagates the lookup error of the first (uncached) resolution.
    pub async fn changed_files(&self) -> Result<Vec<String>, PushTestError> {
        if let Some(cached) = self
            .memo
            .lock()
            .expect("push-test memo lock poisoned")
            .changed_files
            .clone()
        {
            return Ok(cached);
        }
        let files = self
            .changes
            .changed_files(&self.push.repo, &self.push.before, &self.push.after)
            .await?;
        self.memo
            .lock()
            .expect("push-test memo lock poisoned")
            .changed_files = Some(files.clone());
        Ok(files)
    }

    /// Returns the prior goal events for the pushed SHA, memoized.
    ///
    /// # Errors
    ///
    /// Propagates the lookup error of the first (uncached) resolution.
    pub async fn goals_for_sha(&self) -> Result<Vec<SdmGoalEvent>, PushTestError> {
        if let Some(cached) = self
            .memo
            .lock()
            .expect("push-test memo lock poisoned")
            .goals
            .clone()
        {
            return Ok(cached);
        }
        let goals = self
            .goals
            .goals_for_sha(&self.push.repo, &self.push.after)
            .await?;
        self.memo
            .lock()
            .expect("push-test memo lock poisoned")
            .goals = Some(goals.clone());
        Ok(goals)
    }

    /// Returns the content of `path` in the project, memoized.
    ///
    /// # Errors
    ///
    /// Propagates the read error of the first (uncached) resolution.
    pub async fn content(&self, path: &str) -> Result<String, PushTestError> {
        if let Some(cached) = self
            .memo
            .lock()
            .expect("push-test memo lock poisoned")
            .contents
            .get(path)
            .cloned()
        {
            return Ok(cached);
        }
        let content = self.project.content(path).await?;
        self.memo
            .lock()
            .expect("push-test memo lock poisoned")
            .contents
            .insert(path.to_string(), content.clone());
        Ok(content)
    }

    /// Returns `true` if the workspace has a matching resource provider.
    ///
    /// # Errors
    ///
    /// Propagates the lookup error.
    pub async fn has_provider(
        &self,
        provider_type: &str,
        name: Option<&str>,
    ) -> Result<bool, PushTestError> {
        self.providers.has_provider(provider_type, name).await
    }
}
