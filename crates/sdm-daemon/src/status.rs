//! External commit-status publication.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use sdm_core::goal::ExternalStatusState;
use sdm_core::push::RepoRef;

/// The status context this registration publishes under.
#[must_use]
pub fn status_context(registration: &str) -> String {
    format!("sdm/{registration}")
}

/// One commit status.
#[derive(Debug, Clone, Serialize)]
pub struct CommitStatus {
    /// Status context, `sdm/<registration>`.
    pub context: String,
    /// Human description.
    pub description: String,
    /// Link for the status, e.g. a goal log URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// The status state.
    pub state: ExternalStatusState,
}

/// Errors raised while publishing a status.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatusError {
    /// The provider endpoint rejected the request or was unreachable.
    #[error("status endpoint failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Publishes commit statuses to the source-control provider.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publishes `status` for `(repo, sha)`.
    async fn publish(
        &self,
        repo: &RepoRef,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<(), StatusError>;
}

/// Publishes statuses over HTTP with a PUT per status.
pub struct HttpStatusPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStatusPublisher {
    /// Creates a publisher against the provider base URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl StatusPublisher for HttpStatusPublisher {
    async fn publish(
        &self,
        repo: &RepoRef,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<(), StatusError> {
        let url = format!(
            "{}/repos/{}/{}/statuses/{sha}",
            self.endpoint.trim_end_matches('/'),
            repo.owner,
            repo.name
        );
        self.client
            .put(&url)
            .json(status)
            .send()
            .await?
            .error_for_status()?;
        info!(
            repo = %repo,
            sha,
            context = %status.context,
            state = status.state.as_str(),
            "published commit status"
        );
        Ok(())
    }
}

/// Status sink that only logs; used when no endpoint is configured.
pub struct NoopStatusPublisher;

#[async_trait]
impl StatusPublisher for NoopStatusPublisher {
    async fn publish(
        &self,
        repo: &RepoRef,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<(), StatusError> {
        info!(
            repo = %repo,
            sha,
            context = %status.context,
            state = status.state.as_str(),
            "commit status (no endpoint configured)"
        );
        Ok(())
    }
}

/// Records published statuses for assertions in tests.
#[derive(Default)]
pub struct RecordingStatusPublisher {
    published: Mutex<Vec<(RepoRef, String, CommitStatus)>>,
}

impl RecordingStatusPublisher {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every published `(repo, sha, status)` triple.
    #[must_use]
    pub fn published(&self) -> Vec<(RepoRef, String, CommitStatus)> {
        self.published
            .lock()
            .expect("status recorder lock poisoned")
            .clone()
    }
}

#[async_trait]
impl StatusPublisher for RecordingStatusPublisher {
    async fn publish(
        &self,
        repo: &RepoRef,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<(), StatusError> {
        self.published
            .lock()
            .expect("status recorder lock poisoned")
            .push((repo.clone(), sha.to_string(), status.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_format() {
        assert_eq!(status_context("my-sdm"), "sdm/my-sdm");
    }

    #[tokio::test]
    async fn recorder_captures_statuses() {
        let recorder = RecordingStatusPublisher::new();
        let repo = RepoRef::new("octocat", "hello", "gh");
        recorder
            .publish(
                &repo,
                "abc",
                &CommitStatus {
                    context: status_context("my-sdm"),
                    description: "all goals planned".to_string(),
                    target_url: None,
                    state: ExternalStatusState::Pending,
                },
            )
            .await
            .unwrap();

        let published = recorder.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, "abc");
        assert_eq!(published[0].2.state, ExternalStatusState::Pending);
    }
}
