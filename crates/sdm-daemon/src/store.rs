//! Goal-store contract and the in-memory implementation.
//!
//! The external backend owns durable goal history; this trait is its
//! contract. The in-memory implementation backs tests and standalone mode,
//! and feeds state changes back onto the bus so the full pipeline runs
//! without any external service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use sdm_core::goal::{GoalSet, GoalSetRecord, GoalSetState, GoalState};
use sdm_core::push::{PushTestError, RepoRef};
use sdm_core::SdmGoalEvent;

use crate::bus::{EventBus, SdmEvent};
use crate::jobs::{Job, JobTaskState};

/// Errors raised by goal-store operations.
///
/// Store errors are transient from the handler's point of view: the event
/// handler fails and the bus redelivers the event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity kind, e.g. `goal` or `job`.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The backend was unreachable or answered with an error.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

/// The external store contract for goals, goal sets, jobs and preferences.
///
/// Goals are keyed by `(goal_set_id, unique_name)`; isolated workers fetch
/// their goal by exactly that pair.
#[async_trait]
pub trait GoalStore: Send + Sync {
    /// Inserts or updates a goal event.
    async fn store_goal(&self, goal: &SdmGoalEvent) -> Result<(), StoreError>;

    /// Fetches one goal event.
    async fn goal(
        &self,
        goal_set_id: &str,
        unique_name: &str,
    ) -> Result<Option<SdmGoalEvent>, StoreError>;

    /// Fetches every goal of a set.
    async fn goals_for_set(&self, goal_set_id: &str) -> Result<Vec<SdmGoalEvent>, StoreError>;

    /// Fetches every goal recorded for `(repo, sha)` across sets.
    async fn goals_for_sha(
        &self,
        repo: &RepoRef,
        sha: &str,
    ) -> Result<Vec<SdmGoalEvent>, StoreError>;

    /// Inserts or updates a goal-set record.
    async fn store_goal_set(&self, record: &GoalSetRecord) -> Result<(), StoreError>;

    /// Fetches a goal-set record.
    async fn goal_set(&self, goal_set_id: &str) -> Result<Option<GoalSetRecord>, StoreError>;

    /// Lists sets planned by `registration` that are still in process.
    ///
    /// The member goal states decide; a stale cached state on the record
    /// does not.
    async fn pending_goal_sets(
        &self,
        registration: &str,
    ) -> Result<Vec<GoalSetRecord>, StoreError>;

    /// Creates a job.
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Fetches a job by id.
    async fn job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Updates the state of one job task.
    async fn set_job_task_state(
        &self,
        job_id: &str,
        task_id: &str,
        state: JobTaskState,
        message: Option<String>,
    ) -> Result<(), StoreError>;

    /// Sets a boolean workspace preference.
    async fn set_preference(&self, key: &str, value: bool) -> Result<(), StoreError>;

    /// Reads a boolean workspace preference; absent keys read `false`.
    async fn preference(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns `true` if the workspace has a matching resource provider.
    async fn has_resource_provider(
        &self,
        provider_type: &str,
        name: Option<&str>,
    ) -> Result<bool, StoreError>;
}

/// Assembles the full [`GoalSet`] for a goal event from the store.
///
/// # Errors
///
/// Propagates store errors; returns the set even when it is empty.
pub async fn goal_set_of(
    store: &dyn GoalStore,
    goal: &SdmGoalEvent,
) -> Result<GoalSet, StoreError> {
    let goals = store.goals_for_set(&goal.goal_set_id).await?;
    Ok(GoalSet {
        goal_set_id: goal.goal_set_id.clone(),
        sha: goal.sha.clone(),
        branch: goal.branch.clone(),
        repo: goal.repo.clone(),
        goals,
    })
}

#[derive(Default)]
struct Inner {
    /// Keyed by `(goal_set_id, unique_name)`.
    goals: HashMap<(String, String), SdmGoalEvent>,
    sets: HashMap<String, GoalSetRecord>,
    jobs: HashMap<String, Job>,
    preferences: HashMap<String, bool>,
    providers: Vec<(String, String)>,
}

/// In-memory store that feeds state changes back onto a bus.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    bus: Option<Arc<dyn EventBus>>,
}

impl InMemoryStore {
    /// Creates a silent store that emits no events.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            bus: None,
        }
    }

    /// Creates a store that publishes goal state changes onto `bus`.
    #[must_use]
    pub fn with_bus(bus: Arc<dyn EventBus>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            bus: Some(bus),
        }
    }

    /// Registers a workspace resource provider.
    pub fn register_resource_provider(&self, provider_type: &str, name: &str) {
        self.lock()
            .providers
            .push((provider_type.to_string(), name.to_string()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }

    fn emit_for_state_change(&self, previous: Option<GoalState>, goal: &SdmGoalEvent) {
        let Some(bus) = &self.bus else {
            return;
        };
        if previous == Some(goal.state) {
            return;
        }
        match goal.state {
            GoalState::Requested => bus.publish(SdmEvent::GoalRequested(goal.clone())),
            GoalState::Success => {
                bus.publish(SdmEvent::GoalSucceeded(goal.clone()));
                bus.publish(SdmEvent::GoalCompleted(goal.clone()));
            },
            state if state.is_terminal() => {
                bus.publish(SdmEvent::GoalCompleted(goal.clone()));
            },
            _ => {},
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GoalStore for InMemoryStore {
    async fn store_goal(&self, goal: &SdmGoalEvent) -> Result<(), StoreError> {
        let previous = {
            let mut inner = self.lock();
            let key = (goal.goal_set_id.clone(), goal.unique_name.clone());
            inner
                .goals
                .insert(key, goal.clone())
                .map(|previous| previous.state)
        };
        self.emit_for_state_change(previous, goal);
        Ok(())
    }

    async fn goal(
        &self,
        goal_set_id: &str,
        unique_name: &str,
    ) -> Result<Option<SdmGoalEvent>, StoreError> {
        Ok(self
            .lock()
            .goals
            .get(&(goal_set_id.to_string(), unique_name.to_string()))
            .cloned())
    }

    async fn goals_for_set(&self, goal_set_id: &str) -> Result<Vec<SdmGoalEvent>, StoreError> {
        let mut goals: Vec<SdmGoalEvent> = self
            .lock()
            .goals
            .values()
            .filter(|g| g.goal_set_id == goal_set_id)
            .cloned()
            .collect();
        goals.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(goals)
    }

    async fn goals_for_sha(
        &self,
        repo: &RepoRef,
        sha: &str,
    ) -> Result<Vec<SdmGoalEvent>, StoreError> {
        let mut goals: Vec<SdmGoalEvent> = self
            .lock()
            .goals
            .values()
            .filter(|g| g.repo == *repo && g.sha == sha)
            .cloned()
            .collect();
        goals.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(goals)
    }

    async fn store_goal_set(&self, record: &GoalSetRecord) -> Result<(), StoreError> {
        self.lock()
            .sets
            .insert(record.goal_set_id.clone(), record.clone());
        Ok(())
    }

    async fn goal_set(&self, goal_set_id: &str) -> Result<Option<GoalSetRecord>, StoreError> {
        Ok(self.lock().sets.get(goal_set_id).cloned())
    }

    async fn pending_goal_sets(
        &self,
        registration: &str,
    ) -> Result<Vec<GoalSetRecord>, StoreError> {
        let records: Vec<GoalSetRecord> = {
            let inner = self.lock();
            inner.sets.values().cloned().collect()
        };

        let mut pending = Vec::new();
        for record in records {
            let goals = self.goals_for_set(&record.goal_set_id).await?;
            let planned_here = goals.iter().any(|g| {
                g.provenance
                    .first()
                    .is_some_and(|p| p.registration == registration)
            });
            let open = goals.iter().any(|g| !g.state.is_terminal());
            if planned_here && open {
                pending.push(record);
            }
        }
        pending.sort_by(|a, b| a.ts.cmp(&b.ts));
        Ok(pending)
    }

    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.lock().jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(id).cloned())
    }

    async fn set_job_task_state(
        &self,
        job_id: &str,
        task_id: &str,
        state: JobTaskState,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(job_id).ok_or_else(|| StoreError::NotFound {
            entity: "job",
            id: job_id.to_string(),
        })?;
        let task = job
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "job task",
                id: task_id.to_string(),
            })?;
        task.state = state;
        task.message = message;
        Ok(())
    }

    async fn set_preference(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.lock().preferences.insert(key.to_string(), value);
        Ok(())
    }

    async fn preference(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().preferences.get(key).copied().unwrap_or(false))
    }

    async fn has_resource_provider(
        &self,
        provider_type: &str,
        name: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(self.lock().providers.iter().any(|(t, n)| {
            t == provider_type && name.map_or(true, |expected| n == expected)
        }))
    }
}

/// Adapts a [`GoalStore`] to the push-test goal lookup.
pub struct StoreGoalLookup(pub Arc<dyn GoalStore>);

#[async_trait]
impl sdm_core::push::GoalLookup for StoreGoalLookup {
    async fn goals_for_sha(
        &self,
        repo: &RepoRef,
        sha: &str,
    ) -> Result<Vec<SdmGoalEvent>, PushTestError> {
        self.0
            .goals_for_sha(repo, sha)
            .await
            .map_err(PushTestError::lookup)
    }
}

/// Adapts a [`GoalStore`] to the push-test resource-provider lookup.
pub struct StoreResourceProviders(pub Arc<dyn GoalStore>);

#[async_trait]
impl sdm_core::push::ResourceProviderLookup for StoreResourceProviders {
    async fn has_provider(
        &self,
        provider_type: &str,
        name: Option<&str>,
    ) -> Result<bool, PushTestError> {
        self.0
            .has_resource_provider(provider_type, name)
            .await
            .map_err(PushTestError::lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::test_support::{requested_goal, sample_push};

    #[tokio::test]
    async fn store_and_fetch_round_trip() {
        let store = InMemoryStore::new();
        let goal = requested_goal("build", "set-1");
        store.store_goal(&goal).await.unwrap();

        let fetched = store.goal("set-1", "build").await.unwrap().unwrap();
        assert_eq!(fetched.unique_name, "build");
        assert_eq!(fetched.state, GoalState::Requested);

        let by_sha = store
            .goals_for_sha(&sample_push().repo, &goal.sha)
            .await
            .unwrap();
        assert_eq!(by_sha.len(), 1);
    }

    #[tokio::test]
    async fn state_changes_are_published_once() {
        let bus = Arc::new(InMemoryBus::default());
        let store = InMemoryStore::with_bus(bus.clone());
        let mut rx = bus.subscribe();

        let goal = requested_goal("build", "set-1");
        store.store_goal(&goal).await.unwrap();
        // Re-storing the same state publishes nothing.
        store.store_goal(&goal).await.unwrap();

        let mut done = goal.clone();
        done.transition(GoalState::InProcess, 2).unwrap();
        store.store_goal(&done).await.unwrap();
        done.transition(GoalState::Success, 3).unwrap();
        store.store_goal(&done).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(match event {
                SdmEvent::GoalRequested(_) => "requested",
                SdmEvent::GoalSucceeded(_) => "succeeded",
                SdmEvent::GoalCompleted(_) => "completed",
                _ => "other",
            });
        }
        assert_eq!(seen, vec!["requested", "succeeded", "completed"]);
    }

    #[tokio::test]
    async fn pending_sets_require_open_goals_and_matching_registration() {
        let store = InMemoryStore::new();
        let goal = requested_goal("build", "set-1");
        store.store_goal(&goal).await.unwrap();

        let record = GoalSetRecord {
            goal_set_id: "set-1".to_string(),
            sha: goal.sha.clone(),
            branch: goal.branch.clone(),
            repo: goal.repo.clone(),
            state: GoalSetState::InProcess,
            goals: vec![goal.key()],
            ts: 1,
        };
        store.store_goal_set(&record).await.unwrap();

        assert_eq!(store.pending_goal_sets("my-sdm").await.unwrap().len(), 1);
        assert!(store.pending_goal_sets("other-sdm").await.unwrap().is_empty());

        let mut done = goal;
        done.transition(GoalState::InProcess, 2).unwrap();
        done.transition(GoalState::Success, 3).unwrap();
        store.store_goal(&done).await.unwrap();
        assert!(store.pending_goal_sets("my-sdm").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_task_state_updates() {
        use crate::jobs::{Job, JobTask};

        let store = InMemoryStore::new();
        let job = Job {
            id: "j1".to_string(),
            name: "isolated-goal".to_string(),
            owner: "my-sdm".to_string(),
            data: None,
            tasks: vec![JobTask {
                id: "t1".to_string(),
                name: "run".to_string(),
                parameters: None,
                state: JobTaskState::Created,
                message: None,
            }],
        };
        store.create_job(&job).await.unwrap();
        store
            .set_job_task_state("j1", "t1", JobTaskState::Success, Some("done".to_string()))
            .await
            .unwrap();

        let job = store.job("j1").await.unwrap().unwrap();
        assert_eq!(job.tasks[0].state, JobTaskState::Success);
        assert_eq!(job.tasks[0].message.as_deref(), Some("done"));

        let missing = store
            .set_job_task_state("j1", "t9", JobTaskState::Success, None)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn preferences_default_to_false() {
        let store = InMemoryStore::new();
        assert!(!store.preference("deploy-enabled/octocat/hello").await.unwrap());
        store
            .set_preference("deploy-enabled/octocat/hello", true)
            .await
            .unwrap();
        assert!(store.preference("deploy-enabled/octocat/hello").await.unwrap());
    }

    #[tokio::test]
    async fn resource_providers_match_on_type_and_optional_name() {
        let store = InMemoryStore::new();
        store.register_resource_provider("KubernetesClusterProvider", "prod");

        assert!(store
            .has_resource_provider("KubernetesClusterProvider", None)
            .await
            .unwrap());
        assert!(store
            .has_resource_provider("KubernetesClusterProvider", Some("prod"))
            .await
            .unwrap());
        assert!(!store
            .has_resource_provider("KubernetesClusterProvider", Some("staging"))
            .await
            .unwrap());
        assert!(!store
            .has_resource_provider("DockerRegistryProvider", None)
            .await
            .unwrap());
    }
}
