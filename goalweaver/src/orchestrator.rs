//! Batch dispatch loop over the goal graph.
//!
//! Each iteration cuts a batch from the planner, runs every goal's agent
//! concurrently up to a shared deadline, applies results in batch order and
//! flushes the store. The loop ends when the graph converges; the stall
//! failsafe guarantees that it does.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, instrument, warn};

use crate::agents::{Agent, AgentContext, AgentRegistry};
use crate::core::graph::{GoalGraph, GraphError};
use crate::core::planner::{AdaptivePlanner, RewriteSignal, rewritten_batch_size};
use crate::core::types::{Event, EventType, Goal, GoalStatus, LogEntry, StepResult};
use crate::io::config::WeaverConfig;
use crate::io::state_store::{SharedStateStore, StoreError};

/// Agent name recorded on entries the loop writes itself.
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";
pub const STALL_NOTE: &str = "stalled/blocked";
pub const TIMEOUT_NOTE: &str = "timed out at batch deadline";

const FLUSH_RETRY_DELAY: Duration = Duration::from_millis(50);
/// Slack after the deadline for a task to report its own timeout.
const JOIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("persisting state failed after {attempts} attempts")]
    Persist {
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no agents registered")]
    NoAgents,
}

/// Whole-run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Stalled,
    Converged,
}

/// Summary returned by [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub phase: RunPhase,
    /// Batches dispatched.
    pub iterations: u32,
    pub stalled: bool,
    pub done: Vec<String>,
    pub failed: Vec<String>,
    /// Goals failed by the stall failsafe (a subset of `failed`).
    pub blocked: Vec<String>,
}

impl RunOutcome {
    pub fn all_done(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What one dispatched goal produced.
#[derive(Debug)]
struct GoalOutcome {
    result: StepResult,
    subgoals: Vec<Goal>,
    /// Non-fatal failures from reflect/propose.
    notes: Vec<String>,
}

pub struct Orchestrator {
    planner: AdaptivePlanner,
    agents: AgentRegistry,
    store: Arc<SharedStateStore>,
    config: WeaverConfig,
    batch_size: usize,
    phase: RunPhase,
    events: Vec<Event>,
    flush_failures: u32,
}

impl Orchestrator {
    pub fn new(
        config: WeaverConfig,
        agents: AgentRegistry,
        store: Arc<SharedStateStore>,
    ) -> Result<Self, OrchestratorError> {
        config
            .validate()
            .map_err(|err| OrchestratorError::InvalidConfig(format!("{err:#}")))?;
        if agents.is_empty() {
            return Err(OrchestratorError::NoAgents);
        }
        let planner = AdaptivePlanner::with_order(GoalGraph::new(), config.order.into());
        Ok(Self {
            planner,
            agents,
            store,
            batch_size: config.batch_size,
            config,
            phase: RunPhase::Running,
            events: Vec::new(),
            flush_failures: 0,
        })
    }

    /// Replace the planner, e.g. to install a custom batch order.
    pub fn with_planner(mut self, planner: AdaptivePlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn add_goal(&mut self, goal: Goal) -> Result<(), GraphError> {
        let payload = to_payload(&goal);
        self.planner.graph_mut().add_goal(goal)?;
        self.events.push(Event::new(EventType::GoalAdded, payload));
        Ok(())
    }

    pub fn graph(&self) -> &GoalGraph {
        self.planner.graph()
    }

    pub fn store(&self) -> &Arc<SharedStateStore> {
        &self.store
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Current concurrency bound; may shrink when adaptive batching is on.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Drive the graph to convergence.
    ///
    /// Only a persistence fault surfaces as an error. The graph stays
    /// authoritative in memory either way.
    #[instrument(
        skip_all,
        fields(goals = self.planner.graph().len(), batch_size = self.batch_size)
    )]
    pub async fn run(&mut self) -> Result<RunOutcome, OrchestratorError> {
        self.phase = RunPhase::Running;
        let mut iterations = 0u32;
        let mut idle = 0u32;
        let mut blocked = Vec::new();

        self.persist()?;
        while !self.planner.graph().is_converged() {
            let batch = match self.planner.next_batch(self.batch_size) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(err = %err, "batch selection failed");
                    Vec::new()
                }
            };

            if batch.is_empty() {
                idle += 1;
                debug!(
                    idle,
                    threshold = self.config.stall_threshold,
                    stalled = self.planner.is_stalled(),
                    "empty batch"
                );
                if idle >= self.config.stall_threshold {
                    self.phase = RunPhase::Stalled;
                    blocked.extend(self.fail_blocked());
                }
                self.persist()?;
                continue;
            }

            idle = 0;
            iterations += 1;
            let outcomes = self.dispatch(batch).await;
            let failures = self.apply(outcomes);
            self.store.bump_metric("iterations", 1);
            if failures > 0 && self.config.adaptive_batch {
                self.adapt(failures);
            }
            self.persist()?;
        }

        self.phase = RunPhase::Converged;
        self.persist_final().await?;

        let graph = self.planner.graph();
        let outcome = RunOutcome {
            phase: self.phase,
            iterations,
            stalled: !blocked.is_empty(),
            done: graph.ids_with_status(GoalStatus::Done),
            failed: graph.ids_with_status(GoalStatus::Failed),
            blocked,
        };
        info!(
            iterations,
            done = outcome.done.len(),
            failed = outcome.failed.len(),
            stalled = outcome.stalled,
            "run converged"
        );
        Ok(outcome)
    }

    /// Resolve owners and run every goal of the batch concurrently.
    ///
    /// Outcomes come back in batch order regardless of completion order.
    #[instrument(skip_all, fields(batch = batch.len()))]
    async fn dispatch(&mut self, batch: Vec<Goal>) -> Vec<GoalOutcome> {
        let started = Instant::now();
        let deadline = started + self.config.batch_timeout();
        let world = self.store.get("world").unwrap_or_else(|| json!({}));

        let mut running: Vec<(String, String, Option<JoinHandle<GoalOutcome>>)> =
            Vec::with_capacity(batch.len());
        for mut goal in batch {
            let agent = self.resolve_agent(&mut goal);
            let owner = goal.owner_agent.clone().unwrap_or_default();
            let handle = agent.map(|agent| {
                let ctx = AgentContext {
                    world: world.clone(),
                    store: Arc::clone(&self.store),
                };
                tokio::spawn(run_goal(agent, goal.clone(), ctx, deadline))
            });
            running.push((goal.id, owner, handle));
        }

        let mut outcomes = Vec::with_capacity(running.len());
        for (goal_id, owner, handle) in running {
            let outcome = match handle {
                // A task that blocks its worker never reaches its own timeout.
                Some(mut handle) => match timeout_at(deadline + JOIN_GRACE, &mut handle).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(err)) => {
                        failed_outcome(&goal_id, &owner, format!("agent task aborted: {err}"))
                    }
                    Err(_) => {
                        handle.abort();
                        timed_out(&goal_id, &owner, elapsed_ms(started))
                    }
                },
                None => failed_outcome(
                    &goal_id,
                    &owner,
                    format!("no agent registered for owner '{owner}'"),
                ),
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Owner from the goal, or the first registered agent bound permanently.
    fn resolve_agent(&mut self, goal: &mut Goal) -> Option<Arc<dyn Agent>> {
        if let Some(owner) = &goal.owner_agent {
            return self.agents.get(owner);
        }
        let agent = self.agents.default_agent()?;
        let name = agent.name().to_string();
        if let Err(err) = self.planner.graph_mut().assign_owner(&goal.id, &name) {
            warn!(goal = %goal.id, err = %err, "owner assignment failed");
        }
        goal.owner_agent = Some(name);
        Some(agent)
    }

    /// Apply outcomes in batch order. Returns the number of failed goals.
    fn apply(&mut self, outcomes: Vec<GoalOutcome>) -> usize {
        let mut failures = 0;
        for GoalOutcome {
            result,
            subgoals,
            notes,
        } in outcomes
        {
            let id = result.goal_id.clone();
            let status = if result.success {
                GoalStatus::Done
            } else {
                failures += 1;
                GoalStatus::Failed
            };
            if let Err(err) = self.planner.graph_mut().transition(&id, status) {
                warn!(goal = %id, err = %err, "result not applied");
                self.store.append_log(
                    LogEntry::new(&id, ORCHESTRATOR_AGENT)
                        .note(format!("result not applied: {err}")),
                );
                continue;
            }

            let mut entry = LogEntry::new(&id, &result.agent).success(result.success);
            if let Some(error) = &result.error {
                entry = entry.note(error.clone());
            }
            self.store.append_log(entry);
            self.store.record_artifact(format!("result:{id}"), to_payload(&result));
            self.store.bump_metric(
                if result.success { "goals_done" } else { "goals_failed" },
                1,
            );
            self.events
                .push(Event::new(EventType::ResultEmitted, to_payload(&result)));
            self.events.push(Event::new(
                EventType::GoalUpdated,
                json!({ "id": id, "status": status }),
            ));

            for note in notes {
                warn!(goal = %id, agent = %result.agent, note = %note, "agent hook failed");
                self.store
                    .append_log(LogEntry::new(&id, &result.agent).note(note));
            }

            if !subgoals.is_empty() {
                self.merge_subgoals(&id, subgoals);
            }
        }
        failures
    }

    fn merge_subgoals(&mut self, parent: &str, subgoals: Vec<Goal>) {
        let payloads: Vec<Value> = subgoals.iter().map(to_payload).collect();
        let results = self.planner.graph_mut().add_subgoals(subgoals);

        let mut added = Vec::new();
        for (result, payload) in results.into_iter().zip(payloads) {
            match result {
                Ok(id) => {
                    self.events.push(Event::new(EventType::GoalAdded, payload));
                    added.push(id);
                }
                Err(err) => {
                    warn!(parent, err = %err, "subgoal rejected");
                    self.store.append_log(
                        LogEntry::new(parent, ORCHESTRATOR_AGENT)
                            .note(format!("subgoal rejected: {err}")),
                    );
                }
            }
        }
        if !added.is_empty() {
            debug!(parent, added = added.len(), "subgoals merged");
            self.events.push(Event::new(
                EventType::SubgoalsAdded,
                json!({ "parent": parent, "goals": added }),
            ));
        }
    }

    /// Stall failsafe: fail every goal that can no longer finish.
    ///
    /// Between batches nothing is legitimately IN_PROGRESS, so such goals are
    /// failed through the transition table along with every PENDING/READY goal.
    fn fail_blocked(&mut self) -> Vec<String> {
        let graph = self.planner.graph_mut();
        let mut blocked: Vec<String> = graph
            .ids_with_status(GoalStatus::InProgress)
            .into_iter()
            .filter(|id| graph.transition(id, GoalStatus::Failed).is_ok())
            .collect();
        blocked.extend(graph.fail_unfinished());
        for id in &blocked {
            self.store.append_log(
                LogEntry::new(id, ORCHESTRATOR_AGENT)
                    .success(false)
                    .note(STALL_NOTE),
            );
            self.store.bump_metric("goals_failed", 1);
            self.events.push(Event::new(
                EventType::GoalUpdated,
                json!({ "id": id, "status": GoalStatus::Failed, "note": STALL_NOTE }),
            ));
        }
        warn!(blocked = blocked.len(), "stall failsafe marked goals failed");
        blocked
    }

    fn adapt(&mut self, failures: usize) {
        let rewrite = self.planner.rewrite(&RewriteSignal {
            reason: "failures".to_string(),
            failures,
        });
        if let Some(size) = rewritten_batch_size(&rewrite)
            && size > 0
            && size < self.batch_size
        {
            info!(from = self.batch_size, to = size, "batch size rewritten");
            self.batch_size = size;
            self.events
                .push(Event::new(EventType::PlanRewritten, to_payload(&rewrite)));
        }
    }

    /// Flush once. Failures count against the run-wide retry budget.
    fn persist(&mut self) -> Result<(), OrchestratorError> {
        let snapshot = self.planner.graph().snapshot();
        match self.store.flush(&snapshot) {
            Ok(()) => Ok(()),
            Err(err) => self.record_flush_failure(err),
        }
    }

    /// Final flush retried until it lands or the budget is spent.
    async fn persist_final(&mut self) -> Result<(), OrchestratorError> {
        loop {
            let snapshot = self.planner.graph().snapshot();
            match self.store.flush(&snapshot) {
                Ok(()) => return Ok(()),
                Err(err) => self.record_flush_failure(err)?,
            }
            tokio::time::sleep(FLUSH_RETRY_DELAY).await;
        }
    }

    fn record_flush_failure(&mut self, err: StoreError) -> Result<(), OrchestratorError> {
        self.flush_failures += 1;
        if self.flush_failures > self.config.flush_retries {
            return Err(OrchestratorError::Persist {
                attempts: self.flush_failures,
                source: err,
            });
        }
        warn!(
            err = %err,
            failures = self.flush_failures,
            budget = self.config.flush_retries,
            "flush failed; will retry"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("goals", &self.planner.graph().len())
            .field("agents", &self.agents)
            .field("batch_size", &self.batch_size)
            .field("phase", &self.phase)
            .finish()
    }
}

/// act -> reflect -> propose_subgoals for one goal, bounded by `deadline`.
async fn run_goal(
    agent: Arc<dyn Agent>,
    goal: Goal,
    ctx: AgentContext,
    deadline: Instant,
) -> GoalOutcome {
    let started = Instant::now();
    let name = agent.name().to_string();

    let acted = timeout_at(deadline, agent.act(&goal, &ctx)).await;
    let mut result = match acted {
        // An act that blocked past the deadline without yielding.
        Ok(_) if Instant::now() >= deadline => {
            return timed_out(&goal.id, &name, elapsed_ms(started));
        }
        Ok(Ok(result)) => result,
        Ok(Err(err)) => StepResult::failure(&goal.id, &name, format!("agent raised: {err:#}")),
        Err(_) => return timed_out(&goal.id, &name, elapsed_ms(started)),
    };
    result.goal_id = goal.id.clone();
    result.agent = name;
    result.latency_ms = elapsed_ms(started);

    let mut notes = Vec::new();
    match timeout_at(deadline, agent.reflect(&goal, &result, &ctx)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => notes.push(format!("reflect failed: {err:#}")),
        Err(_) => notes.push("reflect timed out".to_string()),
    }
    let proposed = timeout_at(deadline, agent.propose_subgoals(&goal, &result, &ctx)).await;
    let subgoals = match proposed {
        Ok(Ok(subgoals)) => subgoals,
        Ok(Err(err)) => {
            notes.push(format!("propose_subgoals failed: {err:#}"));
            Vec::new()
        }
        Err(_) => {
            notes.push("propose_subgoals timed out".to_string());
            Vec::new()
        }
    };

    GoalOutcome {
        result,
        subgoals,
        notes,
    }
}

fn failed_outcome(goal_id: &str, agent: &str, error: String) -> GoalOutcome {
    warn!(goal = goal_id, agent, error = %error, "dispatch failed");
    GoalOutcome {
        result: StepResult::failure(goal_id, agent, error),
        subgoals: Vec::new(),
        notes: Vec::new(),
    }
}

fn timed_out(goal_id: &str, agent: &str, latency_ms: u64) -> GoalOutcome {
    warn!(goal = goal_id, agent, "agent missed the batch deadline");
    let mut result = StepResult::failure(goal_id, agent, TIMEOUT_NOTE);
    result.latency_ms = latency_ms;
    GoalOutcome {
        result,
        subgoals: Vec::new(),
        notes: Vec::new(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::state_store::read_state;
    use crate::test_support::{ScriptedAgent, goal, temp_store};

    fn orchestrator(
        agents: Vec<ScriptedAgent>,
        store: Arc<SharedStateStore>,
        config: WeaverConfig,
    ) -> Orchestrator {
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register(Arc::new(agent)).expect("register");
        }
        Orchestrator::new(config, registry, store).expect("orchestrator")
    }

    fn config() -> WeaverConfig {
        WeaverConfig {
            batch_size: 2,
            ..WeaverConfig::default()
        }
    }

    #[tokio::test]
    async fn empty_graph_converges_immediately() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(vec![ScriptedAgent::new("a")], store.clone(), config());
        let outcome = orch.run().await.expect("run");
        assert_eq!(outcome.phase, RunPhase::Converged);
        assert_eq!(outcome.iterations, 0);
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn calls_hooks_in_order_per_goal() {
        let (_temp, store) = temp_store();
        let agent = Arc::new(ScriptedAgent::new("a"));
        let mut registry = AgentRegistry::new();
        registry.register(agent.clone()).expect("register");
        let mut orch = Orchestrator::new(config(), registry, store).expect("orchestrator");
        orch.add_goal(goal("g1", &[]).owned_by("a")).expect("add");

        orch.run().await.expect("run");
        assert_eq!(agent.calls(), vec!["act:g1", "reflect:g1", "propose:g1"]);
    }

    #[tokio::test]
    async fn unset_owner_binds_first_agent() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(
            vec![ScriptedAgent::new("first"), ScriptedAgent::new("second")],
            store,
            config(),
        );
        orch.add_goal(goal("g1", &[])).expect("add");

        orch.run().await.expect("run");
        let g1 = orch.graph().get("g1").expect("g1");
        assert_eq!(g1.owner_agent.as_deref(), Some("first"));
        assert_eq!(g1.status, GoalStatus::Done);
    }

    #[tokio::test]
    async fn unknown_owner_fails_goal_without_aborting() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(vec![ScriptedAgent::new("a")], store.clone(), config());
        orch.add_goal(goal("g1", &[]).owned_by("ghost")).expect("add");
        orch.add_goal(goal("g2", &[]).owned_by("a")).expect("add");

        let outcome = orch.run().await.expect("run");
        assert_eq!(outcome.failed, vec!["g1"]);
        assert_eq!(outcome.done, vec!["g2"]);
        let logs = store.export_logs();
        assert_eq!(
            logs[0].note.as_deref(),
            Some("no agent registered for owner 'ghost'")
        );
    }

    #[tokio::test]
    async fn panicking_agent_becomes_failed_result() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(
            vec![ScriptedAgent::new("a").panic_on("g1")],
            store,
            config(),
        );
        orch.add_goal(goal("g1", &[]).owned_by("a")).expect("add");
        orch.add_goal(goal("g2", &[]).owned_by("a")).expect("add");

        let outcome = orch.run().await.expect("run");
        assert_eq!(outcome.failed, vec!["g1"]);
        assert_eq!(outcome.done, vec!["g2"]);
    }

    #[tokio::test]
    async fn subgoals_are_merged_and_run() {
        let (_temp, store) = temp_store();
        let agent = ScriptedAgent::new("a").propose(
            "root",
            vec![
                goal("child", &["root"]).owned_by("a"),
                goal("root", &[]).owned_by("a"),
            ],
        );
        let mut orch = orchestrator(vec![agent], store.clone(), config());
        orch.add_goal(goal("root", &[]).owned_by("a")).expect("add");

        let outcome = orch.run().await.expect("run");
        assert_eq!(outcome.done, vec!["root", "child"]);
        assert_eq!(outcome.iterations, 2);
        let notes: Vec<String> = store
            .export_logs()
            .into_iter()
            .filter_map(|entry| entry.note)
            .collect();
        assert_eq!(notes, vec!["subgoal rejected: duplicate goal id 'root'"]);
        assert!(
            orch.events()
                .iter()
                .any(|event| event.kind == EventType::SubgoalsAdded)
        );
    }

    #[tokio::test]
    async fn stall_threshold_tolerates_idle_iterations() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(
            vec![ScriptedAgent::new("a")],
            store,
            WeaverConfig {
                stall_threshold: 3,
                ..config()
            },
        );
        orch.add_goal(goal("waiting", &["never"]).owned_by("a"))
            .expect("add");

        let outcome = orch.run().await.expect("run");
        assert!(outcome.stalled);
        assert_eq!(outcome.blocked, vec!["waiting"]);
        assert_eq!(outcome.iterations, 0);
    }

    #[tokio::test]
    async fn adaptive_batch_shrinks_after_failure() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(
            vec![ScriptedAgent::new("a").fail_on("g1")],
            store,
            WeaverConfig {
                batch_size: 3,
                adaptive_batch: true,
                ..WeaverConfig::default()
            },
        );
        for id in ["g1", "g2", "g3", "g4"] {
            orch.add_goal(goal(id, &[]).owned_by("a")).expect("add");
        }

        let outcome = orch.run().await.expect("run");
        assert_eq!(orch.batch_size(), 2);
        assert_eq!(outcome.iterations, 2);
        assert!(
            orch.events()
                .iter()
                .any(|event| event.kind == EventType::PlanRewritten)
        );
    }

    #[tokio::test]
    async fn batch_timeout_fails_slow_goal_only() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(
            vec![ScriptedAgent::new("a").sleep_on("slow", Duration::from_secs(30))],
            store.clone(),
            WeaverConfig {
                batch_timeout_secs: 1,
                ..config()
            },
        );
        orch.add_goal(goal("slow", &[]).owned_by("a")).expect("add");
        orch.add_goal(goal("fast", &[]).owned_by("a")).expect("add");

        let started = std::time::Instant::now();
        let outcome = orch.run().await.expect("run");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(outcome.failed, vec!["slow"]);
        assert_eq!(outcome.done, vec!["fast"]);

        let state = read_state(store.path()).expect("read");
        assert_eq!(state.artifacts["result:slow"]["error"], TIMEOUT_NOTE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_agent_cannot_hold_batch_past_deadline() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(
            vec![ScriptedAgent::new("a").block_on("slow", Duration::from_secs(4))],
            store.clone(),
            WeaverConfig {
                batch_timeout_secs: 1,
                ..config()
            },
        );
        orch.add_goal(goal("slow", &[]).owned_by("a")).expect("add");
        orch.add_goal(goal("fast", &[]).owned_by("a")).expect("add");

        let started = std::time::Instant::now();
        let outcome = orch.run().await.expect("run");
        assert!(started.elapsed() < Duration::from_millis(2500));
        assert_eq!(outcome.failed, vec!["slow"]);
        assert_eq!(outcome.done, vec!["fast"]);

        let state = read_state(store.path()).expect("read");
        assert_eq!(state.artifacts["result:slow"]["error"], TIMEOUT_NOTE);
    }

    #[tokio::test]
    async fn act_returning_after_deadline_is_a_timeout() {
        let (_temp, store) = temp_store();
        let agent: Arc<dyn Agent> =
            Arc::new(ScriptedAgent::new("a").block_on("g1", Duration::from_millis(300)));
        let ctx = AgentContext {
            world: json!({}),
            store,
        };
        let deadline = Instant::now() + Duration::from_millis(100);

        let outcome = run_goal(agent, goal("g1", &[]), ctx, deadline).await;
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.error.as_deref(), Some(TIMEOUT_NOTE));
    }

    #[tokio::test]
    async fn stranded_in_progress_goal_is_failed_by_failsafe() {
        let (_temp, store) = temp_store();
        let mut orch = orchestrator(vec![ScriptedAgent::new("a")], store.clone(), config());
        orch.add_goal(goal("stuck", &[]).owned_by("a")).expect("add");
        orch.add_goal(goal("after", &["stuck"]).owned_by("a")).expect("add");
        orch.planner
            .graph_mut()
            .transition("stuck", GoalStatus::InProgress)
            .expect("strand");

        let outcome = orch.run().await.expect("run");
        assert_eq!(outcome.phase, RunPhase::Converged);
        assert_eq!(outcome.blocked, vec!["stuck", "after"]);
        assert!(orch.graph().is_converged());

        let state = read_state(store.path()).expect("read");
        assert!(
            state
                .logs
                .iter()
                .all(|entry| entry.note.as_deref() == Some(STALL_NOTE))
        );
    }

    #[tokio::test]
    async fn persist_fault_surfaces_after_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "file").expect("seed");
        let store = Arc::new(SharedStateStore::new(blocker.join("state.json")));
        let mut orch = orchestrator(
            vec![ScriptedAgent::new("a")],
            store,
            WeaverConfig {
                flush_retries: 1,
                ..config()
            },
        );
        orch.add_goal(goal("g1", &[]).owned_by("a")).expect("add");

        let err = orch.run().await.expect_err("persist fault");
        assert!(matches!(err, OrchestratorError::Persist { attempts: 2, .. }));
        assert_eq!(
            orch.graph().get("g1").expect("g1").status,
            GoalStatus::Done
        );
    }

    #[test]
    fn rejects_invalid_config_and_empty_registry() {
        let (_temp, store) = temp_store();
        let err = Orchestrator::new(
            WeaverConfig {
                batch_size: 0,
                ..WeaverConfig::default()
            },
            AgentRegistry::new(),
            store.clone(),
        )
        .expect_err("invalid");
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));

        let err = Orchestrator::new(WeaverConfig::default(), AgentRegistry::new(), store)
            .expect_err("no agents");
        assert!(matches!(err, OrchestratorError::NoAgents));
    }
}
