//! Goal dependency graph.
//!
//! The graph is the sole owner of goal status. Edges point from a dependency to
//! the goal that waits on it. Iteration is in insertion order so scheduling is
//! reproducible for a fixed input order.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::core::types::{Goal, GoalStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate goal id '{0}'")]
    DuplicateId(String),
    #[error("goal '{id}' would close a dependency cycle: {}", path.join(" -> "))]
    CycleDetected { id: String, path: Vec<String> },
    #[error("illegal transition for goal '{id}': {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: GoalStatus,
        to: GoalStatus,
    },
    #[error("unknown goal '{0}'")]
    UnknownGoal(String),
    #[error("goal '{id}' already owned by '{owner}'")]
    OwnerAlreadyAssigned { id: String, owner: String },
}

/// Directed acyclic graph of goals.
#[derive(Debug, Clone, Default)]
pub struct GoalGraph {
    goals: Vec<Goal>,
    index: HashMap<String, usize>,
    /// dependency id -> ids of goals that list it. May name ids not yet added.
    dependents: HashMap<String, Vec<String>>,
}

impl GoalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a goal. It starts PENDING and is promoted to READY immediately
    /// when every dependency is already DONE (vacuously true with none).
    ///
    /// On error the graph is unchanged.
    pub fn add_goal(&mut self, mut goal: Goal) -> Result<(), GraphError> {
        if self.index.contains_key(&goal.id) {
            return Err(GraphError::DuplicateId(goal.id));
        }
        if let Some(path) = self.cycle_path(&goal) {
            return Err(GraphError::CycleDetected { id: goal.id, path });
        }

        goal.status = GoalStatus::Pending;
        let mut seen = HashSet::new();
        goal.dependencies.retain(|dep| seen.insert(dep.clone()));
        for dep in &goal.dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .push(goal.id.clone());
        }

        let id = goal.id.clone();
        self.index.insert(id.clone(), self.goals.len());
        self.goals.push(goal);
        self.promote_if_satisfied(&id);
        Ok(())
    }

    /// Best-effort insertion of proposed subgoals: one result per item, in order.
    pub fn add_subgoals(&mut self, goals: Vec<Goal>) -> Vec<Result<String, GraphError>> {
        goals
            .into_iter()
            .map(|goal| {
                let id = goal.id.clone();
                self.add_goal(goal).map(|()| id)
            })
            .collect()
    }

    /// Apply one status change from the legal transition table.
    ///
    /// Marking a goal DONE promotes every dependent whose dependencies are now
    /// all DONE. Marking it FAILED leaves dependents PENDING.
    pub fn transition(&mut self, id: &str, to: GoalStatus) -> Result<(), GraphError> {
        let goal = self
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownGoal(id.to_string()))?;
        let from = goal.status;
        let legal = matches!(
            (from, to),
            (GoalStatus::Pending, GoalStatus::Ready)
                | (GoalStatus::Ready, GoalStatus::InProgress)
                | (GoalStatus::InProgress, GoalStatus::Done)
                | (GoalStatus::InProgress, GoalStatus::Failed)
        );
        if !legal {
            return Err(GraphError::IllegalTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        goal.status = to;

        if to == GoalStatus::Done {
            let waiting = self.dependents.get(id).cloned().unwrap_or_default();
            for dependent in waiting {
                self.promote_if_satisfied(&dependent);
            }
        }
        Ok(())
    }

    /// Stall failsafe: mark every PENDING or READY goal FAILED.
    ///
    /// This is the only status change outside the transition table. Returns
    /// the affected ids in insertion order.
    pub fn fail_unfinished(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        for goal in &mut self.goals {
            if matches!(goal.status, GoalStatus::Pending | GoalStatus::Ready) {
                goal.status = GoalStatus::Failed;
                failed.push(goal.id.clone());
            }
        }
        failed
    }

    /// Bind an owner to a goal that has none.
    pub fn assign_owner(&mut self, id: &str, owner: &str) -> Result<(), GraphError> {
        let goal = self
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownGoal(id.to_string()))?;
        if let Some(existing) = &goal.owner_agent {
            return Err(GraphError::OwnerAlreadyAssigned {
                id: id.to_string(),
                owner: existing.clone(),
            });
        }
        goal.owner_agent = Some(owner.to_string());
        Ok(())
    }

    /// READY goals in insertion order.
    pub fn ready_set(&self) -> Vec<&Goal> {
        self.goals
            .iter()
            .filter(|goal| goal.status == GoalStatus::Ready)
            .collect()
    }

    /// True when every goal is DONE or FAILED.
    pub fn is_converged(&self) -> bool {
        self.goals.iter().all(|goal| goal.status.is_terminal())
    }

    pub fn get(&self, id: &str) -> Option<&Goal> {
        self.index.get(id).map(|&idx| &self.goals[idx])
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn count(&self, status: GoalStatus) -> usize {
        self.goals.iter().filter(|goal| goal.status == status).count()
    }

    /// Ids of goals in the given status, insertion order.
    pub fn ids_with_status(&self, status: GoalStatus) -> Vec<String> {
        self.goals
            .iter()
            .filter(|goal| goal.status == status)
            .map(|goal| goal.id.clone())
            .collect()
    }

    /// Deep copy for persistence or inspection.
    pub fn snapshot(&self) -> Vec<Goal> {
        self.goals.clone()
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Goal> {
        let idx = *self.index.get(id)?;
        self.goals.get_mut(idx)
    }

    fn promote_if_satisfied(&mut self, id: &str) {
        let Some(goal) = self.get(id) else {
            return;
        };
        if goal.status != GoalStatus::Pending {
            return;
        }
        let satisfied = goal.dependencies.iter().all(|dep| {
            self.get(dep)
                .is_some_and(|dep_goal| dep_goal.status == GoalStatus::Done)
        });
        if satisfied && let Some(goal) = self.get_mut(id) {
            goal.status = GoalStatus::Ready;
        }
    }

    /// Path `new -> dep -> .. -> new` if inserting `goal` closes a cycle.
    ///
    /// Existing goals may already depend on `goal.id` by forward reference, so
    /// reachability is walked from the new goal's dependencies back to its id.
    fn cycle_path(&self, goal: &Goal) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        for dep in &goal.dependencies {
            let mut path = vec![goal.id.clone()];
            if self.reaches(dep, &goal.id, &mut visited, &mut path) {
                return Some(path);
            }
        }
        None
    }

    fn reaches<'a>(
        &'a self,
        from: &'a str,
        target: &str,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<String>,
    ) -> bool {
        path.push(from.to_string());
        if from == target {
            return true;
        }
        if visited.insert(from)
            && let Some(node) = self.get(from)
        {
            for dep in &node.dependencies {
                if self.reaches(dep, target, visited, path) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }
}
