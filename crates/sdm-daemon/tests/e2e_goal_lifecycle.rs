//! End-to-end lifecycle: push in, planned set out, goals executed through
//! the full in-memory pipeline, external status published.

mod common;

use common::{sample_push, Harness, ScriptedExecutor};
use sdm_core::goal::{ExternalStatusState, Goal, GoalKey, GoalState};
use sdm_daemon::admin::AdminService;
use sdm_daemon::bus::{EventBus, SdmEvent};
use sdm_daemon::cancel::CancellationService;
use sdm_daemon::dispatch::{ExecuteGoalResult, RegistrationInfo};
use sdm_daemon::handlers::{on_completed, on_success};
use sdm_daemon::store::GoalStore;

fn leaf(name: &str) -> Goal {
    Goal::builder(name, "0-code").description(name).build()
}

fn dependent(name: &str, upstream: &str) -> Goal {
    Goal::builder(name, "0-code")
        .description(name)
        .precondition(GoalKey::new("0-code", upstream))
        .build()
}

#[tokio::test]
async fn leaf_goal_runs_to_success_and_publishes_success_status() {
    let executor = ScriptedExecutor::succeeding();
    let harness = Harness::new(vec![(leaf("build"), executor.clone())]);
    let _loop = harness.start();

    let push = sample_push();
    harness.bus.publish(SdmEvent::Push(push.clone()));

    let goals = harness
        .wait_for_goals(&push.after, |goals| {
            goals.len() == 1 && goals[0].state == GoalState::Success
        })
        .await;
    assert_eq!(goals[0].unique_name, "build");
    assert_eq!(executor.executions.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Pending while planning, success once the set completed.
    harness.wait_for_status(ExternalStatusState::Success).await;
    let published = harness.status.published();
    assert_eq!(published.first().unwrap().2.state, ExternalStatusState::Pending);
}

#[tokio::test]
async fn precondition_chain_executes_in_dependency_order() {
    let build = ScriptedExecutor::succeeding();
    let test = ScriptedExecutor::succeeding();
    let harness = Harness::new(vec![
        (leaf("build"), build),
        (dependent("test", "build"), test),
    ]);
    let _loop = harness.start();

    let push = sample_push();
    harness.bus.publish(SdmEvent::Push(push.clone()));

    let goals = harness
        .wait_for_goals(&push.after, |goals| {
            goals.len() == 2 && goals.iter().all(|g| g.state == GoalState::Success)
        })
        .await;

    let build_goal = goals.iter().find(|g| g.unique_name == "build").unwrap();
    let test_goal = goals.iter().find(|g| g.unique_name == "test").unwrap();
    assert!(test_goal.is_directly_dependent_on(&build_goal.key()));
    assert!(
        test_goal.ts >= build_goal.ts,
        "dependent completed after upstream"
    );

    harness.wait_for_status(ExternalStatusState::Success).await;
}

#[tokio::test]
async fn failing_goal_publishes_failure_and_blocks_dependents() {
    let build = ScriptedExecutor::scripted(vec![Ok(ExecuteGoalResult {
        code: 1,
        message: Some("compilation failed".to_string()),
        ..ExecuteGoalResult::default()
    })]);
    let test = ScriptedExecutor::succeeding();
    let harness = Harness::new(vec![
        (leaf("build"), build),
        (dependent("test", "build"), test.clone()),
    ]);
    let _loop = harness.start();

    let push = sample_push();
    harness.bus.publish(SdmEvent::Push(push.clone()));

    let goals = harness
        .wait_for_goals(&push.after, |goals| {
            goals
                .iter()
                .any(|g| g.unique_name == "build" && g.state == GoalState::Failure)
        })
        .await;

    let test_goal = goals.iter().find(|g| g.unique_name == "test").unwrap();
    assert_eq!(test_goal.state, GoalState::Planned, "dependent never ran");
    assert_eq!(test.executions.load(std::sync::atomic::Ordering::SeqCst), 0);

    harness.wait_for_status(ExternalStatusState::Failure).await;
    let published = harness.status.published();
    assert_eq!(published.last().unwrap().2.description, "compilation failed");
}

#[tokio::test]
async fn cancellation_between_chain_links_stops_the_set() {
    // No event loop: the handlers run by hand so cancellation lands
    // exactly between the upstream success and the dependent request.
    let harness = Harness::new(vec![
        (leaf("build"), ScriptedExecutor::succeeding()),
        (dependent("deploy", "build"), ScriptedExecutor::succeeding()),
    ]);

    let mut build_goal = common::requested_goal("build", "set-1");
    build_goal.transition(GoalState::InProcess, 2_000).unwrap();
    build_goal.transition(GoalState::Success, 3_000).unwrap();
    harness.store.store_goal(&build_goal).await.unwrap();

    let mut deploy_goal = common::requested_goal("deploy", "set-1");
    deploy_goal.state = GoalState::Planned;
    deploy_goal.pre_conditions = vec![GoalKey::new("0-code", "build")];
    harness.store.store_goal(&deploy_goal).await.unwrap();

    // The user cancels before the precondition engine sees the success.
    let cancellation = CancellationService::new(harness.store.clone(), common::REGISTRATION);
    cancellation.cancel_set("set-1").await.unwrap();

    on_success(&harness.ctx, &build_goal).await.unwrap();

    let deploy_goal = harness.store.goal("set-1", "deploy").await.unwrap().unwrap();
    assert_eq!(deploy_goal.state, GoalState::Canceled);

    // The reactor must not report set success.
    on_completed(&harness.ctx, &build_goal).await.unwrap();
    assert!(harness
        .status
        .published()
        .iter()
        .all(|(_, _, s)| s.state != ExternalStatusState::Success));
}

#[tokio::test]
async fn canceled_goal_completion_publishes_failure_status() {
    let harness = Harness::new(vec![(leaf("build"), ScriptedExecutor::succeeding())]);

    let goal = common::requested_goal("build", "set-1");
    harness.store.store_goal(&goal).await.unwrap();

    let cancellation = CancellationService::new(harness.store.clone(), common::REGISTRATION);
    cancellation.cancel_set("set-1").await.unwrap();

    let canceled = harness.store.goal("set-1", "build").await.unwrap().unwrap();
    assert_eq!(canceled.state, GoalState::Canceled);

    // Canceled maps onto a failed external status per the reactor's
    // state mapping.
    on_completed(&harness.ctx, &canceled).await.unwrap();

    let published = harness.status.published();
    assert_eq!(
        published.last().unwrap().2.state,
        ExternalStatusState::Failure
    );
    assert!(published
        .iter()
        .all(|(_, _, s)| s.state != ExternalStatusState::Success));
}

#[tokio::test]
async fn stopped_goal_completion_publishes_failure_status() {
    let harness = Harness::new(vec![(leaf("deploy"), ScriptedExecutor::succeeding())]);

    let mut goal = common::requested_goal("deploy", "set-1");
    goal.transition(GoalState::InProcess, 2_000).unwrap();
    harness.store.store_goal(&goal).await.unwrap();

    let admin = AdminService::new(
        harness.store.clone(),
        RegistrationInfo {
            name: common::REGISTRATION.to_string(),
            version: common::VERSION.to_string(),
        },
    );
    admin.stop_goal("set-1", "deploy", "U123").await.unwrap();

    let stopped = harness.store.goal("set-1", "deploy").await.unwrap().unwrap();
    assert_eq!(stopped.state, GoalState::Stopped);

    on_completed(&harness.ctx, &stopped).await.unwrap();

    let published = harness.status.published();
    assert_eq!(
        published.last().unwrap().2.state,
        ExternalStatusState::Failure
    );
}

#[tokio::test]
async fn retry_feasible_failure_is_re_requested_by_a_later_upstream_success() {
    let flaky = ScriptedExecutor::scripted(vec![Ok(ExecuteGoalResult {
        code: 1,
        message: Some("flaky".to_string()),
        ..ExecuteGoalResult::default()
    })]);
    let retryable = Goal::builder("test", "0-code")
        .description("test")
        .retry_feasible()
        .precondition(GoalKey::new("0-code", "build"))
        .build();
    let harness = Harness::new(vec![
        (leaf("build"), ScriptedExecutor::succeeding()),
        (retryable, flaky.clone()),
    ]);
    let _loop = harness.start();

    let push = sample_push();
    harness.bus.publish(SdmEvent::Push(push.clone()));

    // First round: build succeeds, test fails.
    let goals = harness
        .wait_for_goals(&push.after, |goals| {
            goals
                .iter()
                .any(|g| g.unique_name == "test" && g.state == GoalState::Failure)
        })
        .await;
    let build_goal = goals.iter().find(|g| g.unique_name == "build").unwrap();

    // A later upstream success re-evaluates candidacy.
    harness
        .bus
        .publish(SdmEvent::GoalSucceeded(build_goal.clone()));

    harness
        .wait_for_goals(&push.after, |goals| {
            goals
                .iter()
                .any(|g| g.unique_name == "test" && g.state == GoalState::Success)
        })
        .await;
    assert_eq!(flaky.executions.load(std::sync::atomic::Ordering::SeqCst), 2);
}
