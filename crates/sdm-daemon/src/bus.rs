//! Event-bus contract and the in-memory implementation.
//!
//! The real transport is external; the daemon only consumes the event
//! categories below and emits mutations through the goal store. The
//! in-memory bus backs tests and standalone mode with a tokio broadcast
//! channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use sdm_core::push::{Push, RepoRef};
use sdm_core::SdmGoalEvent;

use crate::jobs::{Job, JobTask};

/// One event delivered by the bus.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SdmEvent {
    /// A push to any branch was observed.
    Push(Push),

    /// The first push to a repository was observed.
    FirstPush {
        /// The repository that received its first push.
        repo: RepoRef,
        /// The repository default branch, when known.
        default_branch: Option<String>,
        /// Head SHA of the first push.
        sha: String,
    },

    /// A goal entered `requested`.
    GoalRequested(SdmGoalEvent),

    /// A goal entered `success`.
    GoalSucceeded(SdmGoalEvent),

    /// A goal entered any terminal state.
    GoalCompleted(SdmGoalEvent),

    /// A job task was created or updated.
    JobTask {
        /// The owning job.
        job: Job,
        /// The task to run.
        task: JobTask,
    },

    /// A user joined a chat channel linked to a repository.
    ChannelJoined {
        /// The chat channel id.
        channel_id: String,
        /// The joining user id.
        user_id: String,
        /// The linked repository, when the channel is linked.
        repo: Option<RepoRef>,
    },

    /// An external commit status reached `success`.
    SuccessStatus {
        /// The status context, e.g. a staging-deploy marker.
        context: String,
        /// The repository the status belongs to.
        repo: RepoRef,
        /// The commit the status belongs to.
        sha: String,
        /// The status target URL, when present.
        target_url: Option<String>,
    },
}

/// Publishes events onto the bus.
pub trait EventBus: Send + Sync {
    /// Publishes one event to all subscribers.
    fn publish(&self, event: SdmEvent);

    /// Subscribes to all events.
    fn subscribe(&self) -> broadcast::Receiver<SdmEvent>;
}

/// In-memory bus over a tokio broadcast channel.
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<SdmEvent>>,
}

impl InMemoryBus {
    /// Creates a bus buffering up to `capacity` undelivered events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: SdmEvent) {
        // A send error only means there is no subscriber yet.
        if self.sender.send(event).is_err() {
            warn!("event published with no subscribers");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SdmEvent> {
        self.sender.subscribe()
    }
}
