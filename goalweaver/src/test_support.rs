//! Builders and scripted agents shared by unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::agents::{Agent, AgentContext, log_reflection};
use crate::core::types::{Goal, StepResult};
use crate::io::state_store::SharedStateStore;

/// Goal with a fixed id, title equal to the id, and the given dependencies.
pub fn goal(id: &str, deps: &[&str]) -> Goal {
    deps.iter()
        .fold(Goal::with_id(id, id), |goal, dep| goal.depends_on(*dep))
}

/// Store writing to `state.json` inside a fresh temp dir.
pub fn temp_store() -> (tempfile::TempDir, Arc<SharedStateStore>) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SharedStateStore::new(temp.path().join("state.json")));
    (temp, store)
}

/// Agent whose behavior per goal id is scripted up front.
///
/// Unscripted goals succeed with content `done <id>`.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    name: String,
    fail: HashSet<String>,
    raise: HashSet<String>,
    panic: HashSet<String>,
    sleep: HashMap<String, Duration>,
    block: HashMap<String, Duration>,
    proposals: HashMap<String, Vec<Goal>>,
    success_metric: Option<String>,
    reflect: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Return an unsuccessful result for `id`.
    pub fn fail_on(mut self, id: &str) -> Self {
        self.fail.insert(id.to_string());
        self
    }

    /// Return an error from `act` for `id`.
    pub fn raise_on(mut self, id: &str) -> Self {
        self.raise.insert(id.to_string());
        self
    }

    pub fn panic_on(mut self, id: &str) -> Self {
        self.panic.insert(id.to_string());
        self
    }

    pub fn sleep_on(mut self, id: &str, duration: Duration) -> Self {
        self.sleep.insert(id.to_string(), duration);
        self
    }

    /// Block the worker thread in `act` for `id` without yielding.
    pub fn block_on(mut self, id: &str, duration: Duration) -> Self {
        self.block.insert(id.to_string(), duration);
        self
    }

    pub fn propose(mut self, parent: &str, goals: Vec<Goal>) -> Self {
        self.proposals.insert(parent.to_string(), goals);
        self
    }

    /// Bump `metric` by one on every successful `act`.
    pub fn bump_on_success(mut self, metric: &str) -> Self {
        self.success_metric = Some(metric.to_string());
        self
    }

    /// Log a reflection note for every result.
    pub fn reflecting(mut self) -> Self {
        self.reflect = true;
        self
    }

    /// Calls in the order received, e.g. `act:g1`, `reflect:g1`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: &str, goal: &Goal) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{call}:{}", goal.id));
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult> {
        self.record("act", goal);
        if let Some(duration) = self.sleep.get(&goal.id) {
            tokio::time::sleep(*duration).await;
        }
        if let Some(duration) = self.block.get(&goal.id) {
            std::thread::sleep(*duration);
        }
        if self.panic.contains(&goal.id) {
            panic!("scripted panic for {}", goal.id);
        }
        if self.raise.contains(&goal.id) {
            return Err(anyhow!("scripted failure for {}", goal.id));
        }
        if self.fail.contains(&goal.id) {
            return Ok(StepResult::failure(&goal.id, &self.name, "scripted unsuccessful result"));
        }
        if let Some(metric) = &self.success_metric {
            ctx.store.bump_metric(metric.as_str(), 1);
        }
        Ok(StepResult::success(
            &goal.id,
            &self.name,
            format!("done {}", goal.id),
        ))
    }

    async fn reflect(&self, goal: &Goal, result: &StepResult, ctx: &AgentContext) -> Result<()> {
        self.record("reflect", goal);
        if self.reflect {
            log_reflection(ctx, &self.name, goal, result);
        }
        Ok(())
    }

    async fn propose_subgoals(
        &self,
        goal: &Goal,
        _result: &StepResult,
        _ctx: &AgentContext,
    ) -> Result<Vec<Goal>> {
        self.record("propose", goal);
        Ok(self.proposals.get(&goal.id).cloned().unwrap_or_default())
    }
}
