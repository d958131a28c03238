//! Precondition dependency graph over a planned set of goals.
//!
//! Planning builds this graph once to derive initial goal states (leaves are
//! requested immediately, internal nodes wait) and to reject cyclic
//! precondition declarations before any goal event is emitted.

use std::collections::HashMap;

use super::error::GoalError;
use super::{Goal, GoalKey};

/// The precondition graph of one planned goal set.
///
/// Edges point from a goal to the goals it depends on.
#[derive(Debug)]
pub struct DependencyGraph {
    keys: Vec<GoalKey>,
    /// `edges[i]` holds the indices of the preconditions of goal `i`.
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Builds the graph for a planned set of goal templates.
    ///
    /// # Errors
    ///
    /// - `GoalError::DuplicateGoalKey` when two templates share a key.
    /// - `GoalError::UnknownPrecondition` when a precondition names a goal
    ///   outside the set.
    /// - `GoalError::DependencyCycle` when the precondition edges contain a
    ///   cycle.
    pub fn build(goals: &[Goal]) -> Result<Self, GoalError> {
        let mut index: HashMap<GoalKey, usize> = HashMap::with_capacity(goals.len());
        for (i, goal) in goals.iter().enumerate() {
            if index.insert(goal.key(), i).is_some() {
                return Err(GoalError::DuplicateGoalKey {
                    environment: goal.environment.clone(),
                    unique_name: goal.unique_name.clone(),
                });
            }
        }

        let mut edges = vec![Vec::new(); goals.len()];
        for (i, goal) in goals.iter().enumerate() {
            for pre in &goal.preconditions {
                let Some(&j) = index.get(pre) else {
                    return Err(GoalError::UnknownPrecondition {
                        unique_name: goal.unique_name.clone(),
                        precondition: pre.to_string(),
                    });
                };
                edges[i].push(j);
            }
        }

        let graph = Self {
            keys: goals.iter().map(Goal::key).collect(),
            edges,
        };
        graph.reject_cycles()?;
        Ok(graph)
    }

    /// Returns the keys of the goals with no preconditions.
    #[must_use]
    pub fn leaves(&self) -> Vec<&GoalKey> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| &self.keys[i])
            .collect()
    }

    /// Returns `true` if the goal at `key` has no preconditions.
    #[must_use]
    pub fn is_leaf(&self, key: &GoalKey) -> bool {
        self.keys
            .iter()
            .position(|k| k == key)
            .is_some_and(|i| self.edges[i].is_empty())
    }

    /// Rejects cycles via Tarjan's strongly-connected-components pass.
    ///
    /// Any component with more than one member, or a single member with a
    /// self edge, is a cycle.
    fn reject_cycles(&self) -> Result<(), GoalError> {
        let n = self.keys.len();
        let mut state = TarjanState {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
        };

        for v in 0..n {
            if state.index[v].is_none() {
                if let Some(cycle) = self.strongconnect(v, &mut state) {
                    let members = cycle
                        .iter()
                        .map(|&i| self.keys[i].to_string())
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    return Err(GoalError::DependencyCycle { members });
                }
            }
        }
        Ok(())
    }

    fn strongconnect(&self, v: usize, state: &mut TarjanState) -> Option<Vec<usize>> {
        state.index[v] = Some(state.next_index);
        state.lowlink[v] = state.next_index;
        state.next_index += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        for &w in &self.edges[v] {
            if state.index[w].is_none() {
                if let Some(cycle) = self.strongconnect(w, state) {
                    return Some(cycle);
                }
                state.lowlink[v] = state.lowlink[v].min(state.lowlink[w]);
            } else if state.on_stack[w] {
                state.lowlink[v] = state.lowlink[v].min(state.index[w].unwrap_or(0));
            }
        }

        if Some(state.lowlink[v]) == state.index[v] {
            let mut component = Vec::new();
            loop {
                let w = state.stack.pop()?;
                state.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            let self_loop = component.len() == 1 && self.edges[v].contains(&v);
            if component.len() > 1 || self_loop {
                component.reverse();
                return Some(component);
            }
        }
        None
    }
}

struct TarjanState {
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
}
