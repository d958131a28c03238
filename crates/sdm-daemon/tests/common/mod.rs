//! Shared harness for the daemon integration tests: a complete in-memory
//! pipeline with scripted executors and a recording status publisher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sdm_core::goal::{Fulfillment, Goal, GoalState, Provenance, SdmGoalEvent};
use sdm_core::plan::{Planner, PushRule};
use sdm_core::push::{
    ChangeLookup, Commit, Committer, LocalProjectLoader, Push, PushTestError, PushTestNode,
    RepoRef,
};

use sdm_daemon::bus::{EventBus, InMemoryBus};
use sdm_daemon::context::{SdmContext, SdmContextBuilder};
use sdm_daemon::dispatch::{
    ExecuteGoalResult, ExecutionError, GoalExecutor, GoalImplementation, GoalInvocation,
    ImplementationRegistry, RegistrationInfo,
};
use sdm_daemon::handlers::run_event_loop;
use sdm_daemon::status::RecordingStatusPublisher;
use sdm_daemon::store::{GoalStore, InMemoryStore};

pub const REGISTRATION: &str = "my-sdm";
pub const VERSION: &str = "0.4.2";

/// A push to `octocat/hello/gh` on `main`.
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
            email: None,
        },
    }
}

/// A requested goal event outside any planned set.
pub fn requested_goal(name: &str, goal_set_id: &str) -> SdmGoalEvent {
    let template = Goal::builder(name, "0-code").description(name).build();
    SdmGoalEvent::from_template(
        &template,
        &sample_push(),
        goal_set_id,
        GoalState::Requested,
        Fulfillment::sdm(name),
        Provenance {
            registration: REGISTRATION.to_string(),
            version: VERSION.to_string(),
            name: "plan-on-push".to_string(),
            ts: 1_000,
            user_id: None,
            channel_id: None,
            correlation_id: None,
        },
        1_000,
    )
}

/// Executor returning scripted results in order, then plain successes.
pub struct ScriptedExecutor {
    results: Mutex<VecDeque<Result<ExecuteGoalResult, ExecutionError>>>,
    pub executions: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(VecDeque::new()),
            executions: AtomicUsize::new(0),
        })
    }

    pub fn scripted(results: Vec<Result<ExecuteGoalResult, ExecutionError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            executions: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GoalExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _invocation: &GoalInvocation,
    ) -> Result<ExecuteGoalResult, ExecutionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecuteGoalResult::success()))
    }
}

pub struct NoChanges;

#[async_trait]
impl ChangeLookup for NoChanges {
    async fn changed_files(
        &self,
        _repo: &RepoRef,
        _before: &str,
        _after: &str,
    ) -> Result<Vec<String>, PushTestError> {
        Ok(Vec::new())
    }
}

/// The assembled pipeline under test.
pub struct Harness {
    pub ctx: Arc<SdmContext>,
    pub bus: Arc<InMemoryBus>,
    pub store: Arc<InMemoryStore>,
    pub status: Arc<RecordingStatusPublisher>,
    pub project_dir: tempfile::TempDir,
}

impl Harness {
    /// Builds a harness planning `goals` on every default-branch push,
    /// fulfilled by the paired executors.
    pub fn new(goals: Vec<(Goal, Arc<ScriptedExecutor>)>) -> Self {
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(InMemoryStore::with_bus(bus.clone()));
        let status = Arc::new(RecordingStatusPublisher::new());
        let project_dir = tempfile::tempdir().unwrap();

        let mut registry = ImplementationRegistry::new();
        let mut planner = Planner::new(REGISTRATION, VERSION);
        let rule_goals: Vec<Goal> = goals.iter().map(|(g, _)| g.clone()).collect();
        planner = planner.rule(PushRule {
            name: "default-branch".to_string(),
            test: PushTestNode::IsDefaultBranch,
            goals: rule_goals,
        });
        for (goal, executor) in goals {
            planner = planner.fulfillment(
                goal.unique_name.clone(),
                Fulfillment::sdm(goal.unique_name.clone()),
            );
            registry.register(GoalImplementation {
                name: goal.unique_name.clone(),
                goal,
                executor,
                callbacks: Vec::new(),
                listeners: Vec::new(),
            });
        }

        let ctx = SdmContextBuilder::new(
            RegistrationInfo {
                name: REGISTRATION.to_string(),
                version: VERSION.to_string(),
            },
            "W123".to_string(),
            store.clone(),
            Arc::new(planner),
            Arc::new(LocalProjectLoader::new(project_dir.path())),
            Arc::new(NoChanges),
            status.clone(),
        )
        .registry(Arc::new(registry))
        .build();

        Self {
            ctx: Arc::new(ctx),
            bus,
            store,
            status,
            project_dir,
        }
    }

    /// Starts the event loop in the background. The subscription is taken
    /// here, so events published right after `start` returns are seen.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let ctx = self.ctx.clone();
        let receiver = self.bus.subscribe();
        tokio::spawn(async move {
            run_event_loop(ctx.as_ref(), receiver).await;
        })
    }

    /// Polls the store until `predicate` holds for the goals of `sha`.
    ///
    /// Panics after two seconds.
    pub async fn wait_for_goals<F>(&self, sha: &str, predicate: F) -> Vec<SdmGoalEvent>
    where
        F: Fn(&[SdmGoalEvent]) -> bool,
    {
        let repo = sample_push().repo;
        for _ in 0..200 {
            let goals = self.store.goals_for_sha(&repo, sha).await.unwrap();
            if predicate(&goals) {
                return goals;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let goals = self.store.goals_for_sha(&repo, sha).await.unwrap();
        panic!("timed out waiting for goals; current: {goals:#?}");
    }

    /// Polls the status recorder until the latest published state matches.
    ///
    /// Panics after two seconds.
    pub async fn wait_for_status(&self, state: sdm_core::goal::ExternalStatusState) {
        for _ in 0..200 {
            if self
                .status
                .published()
                .last()
                .is_some_and(|(_, _, s)| s.state == state)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for status {state:?}; published: {:#?}",
            self.status
                .published()
                .iter()
                .map(|(_, _, s)| s.state)
                .collect::<Vec<_>>()
        );
    }
}
