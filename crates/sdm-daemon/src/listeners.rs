//! Listener contracts and ordered broadcast helpers.
//!
//! Listener lists are plain vectors invoked in registration order. One
//! listener's failure never aborts the others; failures are logged and the
//! broadcast continues.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use sdm_core::goal::GoalSet;
use sdm_core::push::RepoRef;
use sdm_core::SdmGoalEvent;

/// Errors raised by listeners; they are logged, never propagated.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

/// Delivers messages to the chat channels addressable for a repository.
#[async_trait]
pub trait AddressChannels: Send + Sync {
    /// Sends one message.
    async fn send(&self, message: &str) -> Result<(), ListenerError>;
}

/// Channels adapter that drops messages; used by isolated workers.
pub struct NoopChannels;

#[async_trait]
impl AddressChannels for NoopChannels {
    async fn send(&self, _message: &str) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Records sent messages for assertions in tests.
#[derive(Default)]
pub struct RecordingChannels {
    messages: std::sync::Mutex<Vec<String>>,
}

impl RecordingChannels {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every sent message.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .expect("channels recorder lock poisoned")
            .clone()
    }
}

#[async_trait]
impl AddressChannels for RecordingChannels {
    async fn send(&self, message: &str) -> Result<(), ListenerError> {
        self.messages
            .lock()
            .expect("channels recorder lock poisoned")
            .push(message.to_string());
        Ok(())
    }
}

/// Observes freshly planned goal sets.
#[async_trait]
pub trait GoalsSetListener: Send + Sync {
    /// Called once per planned set, after all goals are stored.
    async fn on_goals_set(&self, set: &GoalSet) -> Result<(), ListenerError>;
}

/// Observes completed goals.
#[async_trait]
pub trait GoalCompletionListener: Send + Sync {
    /// Called for every goal reaching a terminal state, with the full set.
    async fn on_completion(
        &self,
        completed: &SdmGoalEvent,
        all: &GoalSet,
        channels: &dyn AddressChannels,
    ) -> Result<(), ListenerError>;
}

/// Observes users joining repository-linked chat channels.
#[async_trait]
pub trait ChannelJoinListener: Send + Sync {
    /// Called when a user joins a linked channel.
    async fn on_joined(
        &self,
        channel_id: &str,
        user_id: &str,
        repo: Option<&RepoRef>,
    ) -> Result<(), ListenerError>;
}

/// Observes external success statuses, e.g. a finished staging deploy.
#[async_trait]
pub trait SuccessStatusListener: Send + Sync {
    /// Called for every success status matching the subscribed context.
    async fn on_status(
        &self,
        context: &str,
        repo: &RepoRef,
        sha: &str,
        target_url: Option<&str>,
    ) -> Result<(), ListenerError>;
}

/// Invokes `action` for every listener, logging failures and continuing.
pub async fn broadcast<L, F, Fut>(kind: &str, listeners: &[Arc<L>], action: F)
where
    L: ?Sized,
    F: Fn(Arc<L>) -> Fut,
    Fut: std::future::Future<Output = Result<(), ListenerError>>,
{
    for listener in listeners {
        if let Err(err) = action(listener.clone()).await {
            warn!(listener = kind, error = %err, "listener failed");
        }
    }
}
