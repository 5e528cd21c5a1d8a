//! Agent contract, registry, and the bundled demo teams.
//!
//! Agents are external executors. The orchestrator calls `act`, then
//! `reflect`, then `propose_subgoals` for every goal it dispatches.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::types::{Goal, LogEntry, StepResult};
use crate::io::state_store::SharedStateStore;

pub mod coding;
pub mod research;

/// Metric bumped by the bundled agents on every successful `act`.
pub const RUNS_COMPLETED: &str = "runs_completed";

/// Per-dispatch context handed to an agent.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Snapshot of the store's `world` value at dispatch time.
    pub world: Value,
    pub store: Arc<SharedStateStore>,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Perform one step toward the goal. An error fails the goal.
    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult>;

    /// Post-step bookkeeping. Errors are logged and ignored.
    async fn reflect(&self, _goal: &Goal, _result: &StepResult, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    /// Follow-up goals to merge into the graph. Errors are logged and ignored.
    async fn propose_subgoals(
        &self,
        _goal: &Goal,
        _result: &StepResult,
        _ctx: &AgentContext,
    ) -> Result<Vec<Goal>> {
        Ok(Vec::new())
    }
}

/// Reflection note used by the bundled agents.
pub fn log_reflection(ctx: &AgentContext, agent: &str, goal: &Goal, result: &StepResult) {
    ctx.store.append_log(
        LogEntry::new(&goal.id, agent).note(format!("Reflection: success={}", result.success)),
    );
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent '{0}' already registered")]
    DuplicateAgent(String),
}

/// Agents by name, in registration order.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        if self.get(agent.name()).is_some() {
            return Err(RegistryError::DuplicateAgent(agent.name().to_string()));
        }
        self.agents.push(agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .iter()
            .find(|agent| agent.name() == name)
            .cloned()
    }

    /// Owner for goals that were created without one.
    pub fn default_agent(&self) -> Option<Arc<dyn Agent>> {
        self.agents.first().cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|agent| agent.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Agents plus the goals that seed a run.
#[derive(Debug, Clone)]
pub struct Team {
    pub agents: AgentRegistry,
    pub seeds: Vec<Goal>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedAgent;

    #[test]
    fn first_registered_agent_is_default() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::new("alpha")))
            .expect("register");
        registry
            .register(Arc::new(ScriptedAgent::new("beta")))
            .expect("register");
        let default = registry.default_agent().expect("default");
        assert_eq!(default.name(), "alpha");
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::new("alpha")))
            .expect("register");
        let err = registry
            .register(Arc::new(ScriptedAgent::new("alpha")))
            .expect_err("duplicate");
        assert_eq!(err, RegistryError::DuplicateAgent("alpha".to_string()));
    }

    #[test]
    fn reflection_note_is_logged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = AgentContext {
            world: Value::Null,
            store: Arc::new(SharedStateStore::new(temp.path().join("state.json"))),
        };
        let goal = Goal::with_id("g1", "t");
        let result = StepResult::success("g1", "alpha", "ok");
        log_reflection(&ctx, "alpha", &goal, &result);

        let logs = ctx.store.export_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].note.as_deref(), Some("Reflection: success=true"));
    }
}
