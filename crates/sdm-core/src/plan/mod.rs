//! The goal planner: ordered push rules producing goal sets.

use std::collections::HashMap;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::goal::graph::DependencyGraph;
use crate::goal::{
    Fulfillment, Goal, GoalError, GoalSet, GoalState, Provenance, SdmGoalEvent,
};
use crate::push::{evaluate, PushContext, PushTestError, PushTestNode, PushTestRegistry};

/// How goals of multiple matching rules combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanningPolicy {
    /// Every matching rule contributes its goals.
    #[default]
    Additive,
    /// The first matching rule wins; later rules are not evaluated.
    Replace,
}

/// One ordered planning rule: a push test guarding a list of goal templates.
#[derive(Debug, Clone)]
pub struct PushRule {
    /// Rule name, for logs.
    pub name: String,
    /// The push test guarding the goals.
    pub test: PushTestNode,
    /// The goal templates this rule contributes.
    pub goals: Vec<Goal>,
}

/// Errors that can occur while planning a push.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanError {
    /// A push test failed to evaluate.
    #[error(transparent)]
    PushTest(#[from] PushTestError),

    /// The contributed goals do not form a valid set.
    #[error(transparent)]
    Goal(#[from] GoalError),
}

/// Plans goal sets for pushes.
///
/// Rules are evaluated in order; under the default additive policy every
/// matching rule contributes its goals, deduplicated by goal key with the
/// earlier rule winning.
pub struct Planner {
    registration: String,
    version: String,
    policy: PlanningPolicy,
    rules: Vec<PushRule>,
    registry: PushTestRegistry,
    fulfillments: HashMap<String, Fulfillment>,
}

impl Planner {
    /// Creates a planner for this registration.
    #[must_use]
    pub fn new(registration: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            registration: registration.into(),
            version: version.into(),
            policy: PlanningPolicy::default(),
            rules: Vec::new(),
            registry: PushTestRegistry::new(),
            fulfillments: HashMap::new(),
        }
    }

    /// Sets the merging policy.
    #[must_use]
    pub const fn policy(mut self, policy: PlanningPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Appends a planning rule.
    #[must_use]
    pub fn rule(mut self, rule: PushRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replaces the extension predicate registry.
    #[must_use]
    pub fn registry(mut self, registry: PushTestRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Overrides the fulfillment for one goal unique name.
    ///
    /// Goals without an override are fulfilled by this registration.
    #[must_use]
    pub fn fulfillment(mut self, unique_name: impl Into<String>, fulfillment: Fulfillment) -> Self {
        self.fulfillments.insert(unique_name.into(), fulfillment);
        self
    }

    /// Returns the registration name this planner emits provenance for.
    #[must_use]
    pub fn registration(&self) -> &str {
        &self.registration
    }

    fn fulfillment_for(&self, goal: &Goal) -> Fulfillment {
        self.fulfillments
            .get(&goal.unique_name)
            .cloned()
            .unwrap_or_else(|| Fulfillment::sdm(self.registration.clone()))
    }

    /// Plans the goal set for a push.
    ///
    /// Returns `None` when no rule matches or the matching rules contribute
    /// no goals; callers publish no status in that case.
    ///
    /// # Errors
    ///
    /// - `PlanError::PushTest` when a rule's test fails to evaluate; the
    ///   triggering event should be retried.
    /// - `PlanError::Goal` when the contributed goals duplicate a key,
    ///   reference an unknown precondition, or form a cycle.
    pub async fn plan(
        &self,
        ctx: &PushContext,
        correlation_id: Option<&str>,
    ) -> Result<Option<GoalSet>, PlanError> {
        let mut goals: Vec<Goal> = Vec::new();
        for rule in &self.rules {
            if !evaluate(&rule.test, ctx, &self.registry).await? {
                continue;
            }
            debug!(rule = %rule.name, "push rule matched");
            for goal in &rule.goals {
                if goals.iter().any(|g| g.key() == goal.key()) {
                    continue;
                }
                goals.push(goal.clone());
            }
            if self.policy == PlanningPolicy::Replace {
                break;
            }
        }

        if goals.is_empty() {
            debug!(
                repo = %ctx.push.repo,
                branch = %ctx.push.branch,
                "no goals planned for push"
            );
            return Ok(None);
        }

        let graph = DependencyGraph::build(&goals)?;
        let goal_set_id = Uuid::new_v4().to_string();
        let ts = Utc::now().timestamp_millis();
        let provenance = Provenance {
            registration: self.registration.clone(),
            version: self.version.clone(),
            name: "plan-on-push".to_string(),
            ts,
            user_id: None,
            channel_id: None,
            correlation_id: correlation_id.map(ToString::to_string),
        };

        let events: Vec<SdmGoalEvent> = goals
            .iter()
            .map(|goal| {
                let state = if graph.is_leaf(&goal.key()) {
                    if goal.pre_approval_required {
                        GoalState::WaitingForPreApproval
                    } else {
                        GoalState::Requested
                    }
                } else {
                    GoalState::Planned
                };
                SdmGoalEvent::from_template(
                    goal,
                    &ctx.push,
                    &goal_set_id,
                    state,
                    self.fulfillment_for(goal),
                    provenance.clone(),
                    ts,
                )
            })
            .collect();

        info!(
            goal_set_id = %goal_set_id,
            repo = %ctx.push.repo,
            sha = %ctx.push.after,
            goals = events.len(),
            "planned goal set"
        );

        Ok(Some(GoalSet {
            goal_set_id,
            sha: ctx.push.after.clone(),
            branch: ctx.push.branch.clone(),
            repo: ctx.push.repo.clone(),
            goals: events,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::goal::GoalKey;
    use crate::push::test_support::sample_push;
    use crate::push::{
        ChangeLookup, GoalLookup, LocalProject, RepoRef, ResourceProviderLookup,
    };

    struct NoChanges;

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

    struct NoGoals;

    #[async_trait]
    impl GoalLookup for NoGoals {
        async fn goals_for_sha(
            &self,
            _repo: &RepoRef,
            _sha: &str,
        ) -> Result<Vec<SdmGoalEvent>, PushTestError> {
            Ok(Vec::new())
        }
    }

    struct NoProviders;

    #[async_trait]
    impl ResourceProviderLookup for NoProviders {
        async fn has_provider(
            &self,
            _provider_type: &str,
            _name: Option<&str>,
        ) -> Result<bool, PushTestError> {
            Ok(false)
        }
    }

    fn context() -> (tempfile::TempDir, PushContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PushContext::new(
            sample_push(),
            Arc::new(LocalProject::new(dir.path())),
            Arc::new(NoChanges),
            Arc::new(NoGoals),
            Arc::new(NoProviders),
        );
        (dir, ctx)
    }

    fn goal(name: &str, preconditions: &[&str]) -> Goal {
        let mut builder = Goal::builder(name, "0-code").description(name);
        for p in preconditions {
            builder = builder.precondition(GoalKey::new("0-code", *p));
        }
        builder.build()
    }

    fn rule(name: &str, test: PushTestNode, goals: Vec<Goal>) -> PushRule {
        PushRule {
            name: name.to_string(),
            test,
            goals,
        }
    }

    #[tokio::test]
    async fn leaves_start_requested_and_internal_nodes_planned() {
        let planner = Planner::new("my-sdm", "0.4.2").rule(rule(
            "default",
            PushTestNode::IsDefaultBranch,
            vec![goal("build", &[]), goal("test", &["build"])],
        ));
        let (_dir, ctx) = context();

        let set = planner.plan(&ctx, None).await.unwrap().unwrap();
        assert_eq!(set.goals.len(), 2);

        let build = set.goal(&GoalKey::new("0-code", "build")).unwrap();
        let test = set.goal(&GoalKey::new("0-code", "test")).unwrap();
        assert_eq!(build.state, GoalState::Requested);
        assert_eq!(test.state, GoalState::Planned);
        assert_eq!(build.goal_set_id, test.goal_set_id);
        assert_eq!(build.provenance[0].registration, "my-sdm");
    }

    #[tokio::test]
    async fn pre_approval_required_leaf_waits() {
        let approval_goal = Goal::builder("deploy", "1-staging")
            .description("Deploying")
            .pre_approval_required()
            .build();
        let planner = Planner::new("my-sdm", "0.4.2").rule(rule(
            "deploy",
            PushTestNode::IsDefaultBranch,
            vec![approval_goal],
        ));
        let (_dir, ctx) = context();

        let set = planner.plan(&ctx, None).await.unwrap().unwrap();
        assert_eq!(set.goals[0].state, GoalState::WaitingForPreApproval);
    }

    #[tokio::test]
    async fn no_matching_rule_plans_nothing() {
        let planner = Planner::new("my-sdm", "0.4.2").rule(rule(
            "never",
            PushTestNode::IsBranch {
                pattern: "^gh-pages$".to_string(),
            },
            vec![goal("build", &[])],
        ));
        let (_dir, ctx) = context();

        assert!(planner.plan(&ctx, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn additive_policy_merges_matching_rules() {
        let planner = Planner::new("my-sdm", "0.4.2")
            .rule(rule(
                "first",
                PushTestNode::IsDefaultBranch,
                vec![goal("build", &[])],
            ))
            .rule(rule(
                "second",
                PushTestNode::IsDefaultBranch,
                vec![goal("build", &[]), goal("lint", &[])],
            ));
        let (_dir, ctx) = context();

        let set = planner.plan(&ctx, None).await.unwrap().unwrap();
        let mut names: Vec<&str> = set.goals.iter().map(|g| g.unique_name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["build", "lint"]);
    }

    #[tokio::test]
    async fn replace_policy_stops_at_the_first_match() {
        let planner = Planner::new("my-sdm", "0.4.2")
            .policy(PlanningPolicy::Replace)
            .rule(rule(
                "first",
                PushTestNode::IsDefaultBranch,
                vec![goal("build", &[])],
            ))
            .rule(rule(
                "second",
                PushTestNode::IsDefaultBranch,
                vec![goal("lint", &[])],
            ));
        let (_dir, ctx) = context();

        let set = planner.plan(&ctx, None).await.unwrap().unwrap();
        assert_eq!(set.goals.len(), 1);
        assert_eq!(set.goals[0].unique_name, "build");
    }

    #[tokio::test]
    async fn cyclic_goals_fail_planning() {
        let planner = Planner::new("my-sdm", "0.4.2").rule(rule(
            "cyclic",
            PushTestNode::IsDefaultBranch,
            vec![goal("a", &["b"]), goal("b", &["a"])],
        ));
        let (_dir, ctx) = context();

        let result = planner.plan(&ctx, None).await;
        assert!(matches!(
            result,
            Err(PlanError::Goal(GoalError::DependencyCycle { .. }))
        ));
    }

    #[tokio::test]
    async fn fulfillment_overrides_apply() {
        let planner = Planner::new("my-sdm", "0.4.2")
            .fulfillment("deploy", Fulfillment::side_effect("other-sdm"))
            .rule(rule(
                "deploy",
                PushTestNode::IsDefaultBranch,
                vec![goal("build", &[]), goal("deploy", &["build"])],
            ));
        let (_dir, ctx) = context();

        let set = planner.plan(&ctx, None).await.unwrap().unwrap();
        let build = set.goal(&GoalKey::new("0-code", "build")).unwrap();
        let deploy = set.goal(&GoalKey::new("0-code", "deploy")).unwrap();
        assert_eq!(build.fulfillment, Fulfillment::sdm("my-sdm"));
        assert_eq!(deploy.fulfillment, Fulfillment::side_effect("other-sdm"));
    }
}
