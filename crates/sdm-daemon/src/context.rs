//! The explicit SDM context threaded through every handler.
//!
//! There is no process-wide singleton: everything a handler touches
//! (store, planner, registry, schedulers, listeners) hangs off one context
//! value built at startup, or by the isolated-worker bootstrap.

use std::sync::Arc;

use sdm_core::plan::Planner;
use sdm_core::push::{ChangeLookup, ProjectLoader, Push, PushContext};
use sdm_core::sign::{GoalSigner, GoalVerifier};

use crate::dispatch::{ImplementationRegistry, RegistrationInfo};
use crate::jobs::JobTaskRegistry;
use crate::listeners::{
    AddressChannels, ChannelJoinListener, GoalCompletionListener, GoalsSetListener, NoopChannels,
    SuccessStatusListener,
};
use crate::progress::ProgressLogService;
use crate::schedule::GoalScheduler;
use crate::status::StatusPublisher;
use crate::store::{GoalStore, StoreGoalLookup, StoreResourceProviders};

/// Listener lists invoked by the handlers.
#[derive(Default)]
pub struct Listeners {
    /// Fired with every freshly planned goal set.
    pub goals_set: Vec<Arc<dyn GoalsSetListener>>,
    /// Fired for every goal reaching a terminal state.
    pub completion: Vec<Arc<dyn GoalCompletionListener>>,
    /// Fired when a user joins a repository-linked channel.
    pub channel_join: Vec<Arc<dyn ChannelJoinListener>>,
    /// Fired for subscribed external success statuses.
    pub success_status: Vec<Arc<dyn SuccessStatusListener>>,
}

/// Everything the event handlers operate on.
pub struct SdmContext {
    /// This registration.
    pub registration: RegistrationInfo,
    /// Workspace id this registration serves.
    pub workspace_id: String,
    /// Human-readable workspace name.
    pub workspace_name: Option<String>,
    /// The external goal store.
    pub store: Arc<dyn GoalStore>,
    /// The goal planner.
    pub planner: Arc<Planner>,
    /// Loads project views for push tests.
    pub project_loader: Arc<dyn ProjectLoader>,
    /// Resolves changed-file sets.
    pub changes: Arc<dyn ChangeLookup>,
    /// Publishes commit statuses.
    pub status: Arc<dyn StatusPublisher>,
    /// Registered goal implementations.
    pub registry: Arc<ImplementationRegistry>,
    /// Goal schedulers, consulted in order.
    pub schedulers: Vec<Arc<dyn GoalScheduler>>,
    /// Signs outbound goal events, when signing is enabled.
    pub signer: Option<Arc<GoalSigner>>,
    /// Verifies inbound goal events, when signing is enabled.
    pub verifier: Option<Arc<GoalVerifier>>,
    /// Creates persistent progress logs.
    pub progress_logs: Option<Arc<dyn ProgressLogService>>,
    /// The chat channels adapter.
    pub channels: Arc<dyn AddressChannels>,
    /// Listener lists.
    pub listeners: Listeners,
    /// Job-task executors.
    pub job_tasks: Arc<JobTaskRegistry>,
}

impl SdmContext {
    /// Builds the push-test evaluation context for one push.
    ///
    /// # Errors
    ///
    /// Propagates the project-loader failure.
    pub async fn push_context(
        &self,
        push: Push,
    ) -> Result<PushContext, sdm_core::push::PushTestError> {
        let project = self.project_loader.load(&push.repo, &push.after).await?;
        Ok(PushContext::new(
            push,
            project,
            self.changes.clone(),
            Arc::new(StoreGoalLookup(self.store.clone())),
            Arc::new(StoreResourceProviders(self.store.clone())),
        ))
    }

    /// Returns `true` when a side-effect fulfillment names this
    /// registration.
    #[must_use]
    pub fn owns_side_effect(&self, fulfillment_name: &str) -> bool {
        fulfillment_name == self.registration.name
    }
}

/// Builder for [`SdmContext`] with inert defaults for optional parts.
pub struct SdmContextBuilder {
    context: SdmContext,
}

impl SdmContextBuilder {
    /// Starts a context from the required collaborators.
    #[must_use]
    pub fn new(
        registration: RegistrationInfo,
        workspace_id: String,
        store: Arc<dyn GoalStore>,
        planner: Arc<Planner>,
        project_loader: Arc<dyn ProjectLoader>,
        changes: Arc<dyn ChangeLookup>,
        status: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            context: SdmContext {
                registration,
                workspace_id,
                workspace_name: None,
                store,
                planner,
                project_loader,
                changes,
                status,
                registry: Arc::new(ImplementationRegistry::new()),
                schedulers: Vec::new(),
                signer: None,
                verifier: None,
                progress_logs: None,
                channels: Arc::new(NoopChannels),
                listeners: Listeners::default(),
                job_tasks: Arc::new(JobTaskRegistry::new()),
            },
        }
    }

    /// Sets the workspace name.
    #[must_use]
    pub fn workspace_name(mut self, name: impl Into<String>) -> Self {
        self.context.workspace_name = Some(name.into());
        self
    }

    /// Sets the implementation registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ImplementationRegistry>) -> Self {
        self.context.registry = registry;
        self
    }

    /// Appends a scheduler.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn GoalScheduler>) -> Self {
        self.context.schedulers.push(scheduler);
        self
    }

    /// Enables signing and verification.
    #[must_use]
    pub fn signing(mut self, signer: Arc<GoalSigner>, verifier: Arc<GoalVerifier>) -> Self {
        self.context.signer = Some(signer);
        self.context.verifier = Some(verifier);
        self
    }

    /// Enables verification only.
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<GoalVerifier>) -> Self {
        self.context.verifier = Some(verifier);
        self
    }

    /// Sets the progress-log service.
    #[must_use]
    pub fn progress_logs(mut self, service: Arc<dyn ProgressLogService>) -> Self {
        self.context.progress_logs = Some(service);
        self
    }

    /// Sets the chat channels adapter.
    #[must_use]
    pub fn channels(mut self, channels: Arc<dyn AddressChannels>) -> Self {
        self.context.channels = channels;
        self
    }

    /// Sets the listener lists.
    #[must_use]
    pub fn listeners(mut self, listeners: Listeners) -> Self {
        self.context.listeners = listeners;
        self
    }

    /// Sets the job-task registry.
    #[must_use]
    pub fn job_tasks(mut self, registry: Arc<JobTaskRegistry>) -> Self {
        self.context.job_tasks = registry;
        self
    }

    /// Finishes the context.
    #[must_use]
    pub fn build(self) -> SdmContext {
        self.context
    }
}
