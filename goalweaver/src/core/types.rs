//! Shared deterministic types for goal scheduling.
//!
//! These types define the contracts between the graph, the planner, the state
//! store and agents. They carry no I/O and serialize to the state file format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle status of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    Ready,
    InProgress,
    Done,
    Failed,
}

impl GoalStatus {
    /// `DONE` and `FAILED` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, GoalStatus::Done | GoalStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GoalStatus::Pending => "pending",
            GoalStatus::Ready => "ready",
            GoalStatus::InProgress => "in_progress",
            GoalStatus::Done => "done",
            GoalStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority, used by [`crate::core::planner::BatchOrder::Priority`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    Critical = 4,
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub status: GoalStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub owner_agent: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl Goal {
    /// New goal with a fresh UUID v4 id.
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), title)
    }

    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: GoalStatus::Pending,
            dependencies: Vec::new(),
            owner_agent: None,
            priority: Priority::default(),
        }
    }

    pub fn owned_by(mut self, agent: impl Into<String>) -> Self {
        self.owner_agent = Some(agent.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Outcome of one agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub goal_id: String,
    pub agent: String,
    pub success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub artifacts: Map<String, Value>,
    #[serde(default)]
    pub cost_tokens: u64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn success(
        goal_id: impl Into<String>,
        agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            goal_id: goal_id.into(),
            agent: agent.into(),
            success: true,
            content: content.into(),
            artifacts: Map::new(),
            cost_tokens: 0,
            latency_ms: 0,
            error: None,
        }
    }

    pub fn failure(
        goal_id: impl Into<String>,
        agent: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::success(goal_id, agent, "")
        }
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }
}

/// Immutable product log record kept by the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Entries written elsewhere without a timestamp read as the Unix epoch.
    #[serde(default)]
    pub ts: DateTime<Utc>,
    pub goal: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl LogEntry {
    pub fn new(goal: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            goal: goal.into(),
            agent: agent.into(),
            success: None,
            note: None,
        }
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GoalAdded,
    GoalUpdated,
    ResultEmitted,
    SubgoalsAdded,
    PlanRewritten,
}

/// Journal entry recorded by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventType, payload: Value) -> Self {
        Self {
            kind,
            payload,
            ts: Utc::now(),
        }
    }
}

/// Planner-suggested change to run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRewrite {
    pub rationale: String,
    pub changes: Map<String, Value>,
}
