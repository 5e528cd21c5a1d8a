//! Batch selection over the goal graph.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::graph::{GoalGraph, GraphError};
use crate::core::types::{Goal, GoalStatus, PlanRewrite};

/// Comparator applied to the ready set before a batch is cut.
pub type GoalComparator = Arc<dyn Fn(&Goal, &Goal) -> Ordering + Send + Sync>;

/// Ordering of ready goals within a batch.
#[derive(Clone, Default)]
pub enum BatchOrder {
    /// Graph insertion order.
    #[default]
    Insertion,
    /// Higher priority first, then fewer dependencies.
    Priority,
    Custom(GoalComparator),
}

impl fmt::Debug for BatchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOrder::Insertion => f.write_str("Insertion"),
            BatchOrder::Priority => f.write_str("Priority"),
            BatchOrder::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Run signal fed to [`AdaptivePlanner::rewrite`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteSignal {
    pub reason: String,
    pub failures: usize,
}

/// Wraps the goal graph and cuts bounded dispatch batches from its ready set.
#[derive(Debug, Default)]
pub struct AdaptivePlanner {
    graph: GoalGraph,
    order: BatchOrder,
}

impl AdaptivePlanner {
    pub fn new(graph: GoalGraph) -> Self {
        Self::with_order(graph, BatchOrder::default())
    }

    pub fn with_order(graph: GoalGraph, order: BatchOrder) -> Self {
        Self { graph, order }
    }

    pub fn graph(&self) -> &GoalGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut GoalGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> GoalGraph {
        self.graph
    }

    /// Select up to `max_size` ready goals and mark them IN_PROGRESS.
    ///
    /// Goals beyond `max_size` stay READY for the next call. The returned
    /// goals are snapshots taken after the transition.
    pub fn next_batch(&mut self, max_size: usize) -> Result<Vec<Goal>, GraphError> {
        let mut ready: Vec<Goal> = self.graph.ready_set().into_iter().cloned().collect();
        // Stable sorts keep insertion order among ties.
        match &self.order {
            BatchOrder::Insertion => {}
            BatchOrder::Priority => ready.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.dependencies.len().cmp(&b.dependencies.len()))
            }),
            BatchOrder::Custom(cmp) => ready.sort_by(|a, b| cmp(a, b)),
        }
        ready.truncate(max_size);

        for goal in &mut ready {
            self.graph.transition(&goal.id, GoalStatus::InProgress)?;
            goal.status = GoalStatus::InProgress;
        }
        Ok(ready)
    }

    /// Nothing is ready, nothing is running, yet the graph has not converged.
    pub fn is_stalled(&self) -> bool {
        self.graph.ready_set().is_empty()
            && self.graph.count(GoalStatus::InProgress) == 0
            && !self.graph.is_converged()
    }

    /// Suggest run-parameter changes for a signal. Failures shrink the batch.
    pub fn rewrite(&self, signal: &RewriteSignal) -> PlanRewrite {
        let reason = if signal.reason.is_empty() {
            "unknown"
        } else {
            signal.reason.as_str()
        };
        let mut changes = Map::new();
        if signal.failures > 0 {
            changes.insert("batch_size".to_string(), json!(2));
        }
        PlanRewrite {
            rationale: format!("Rewrite triggered by signal: {reason}"),
            changes,
        }
    }
}

/// Batch size proposed by a rewrite, if any.
pub fn rewritten_batch_size(rewrite: &PlanRewrite) -> Option<usize> {
    rewrite
        .changes
        .get("batch_size")
        .and_then(Value::as_u64)
        .and_then(|size| usize::try_from(size).ok())
}
