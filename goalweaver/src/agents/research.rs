//! Research team: researcher -> writer -> critic.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Agent, AgentContext, AgentRegistry, RUNS_COMPLETED, Team, log_reflection};
use crate::core::types::{Goal, Priority, StepResult};
use crate::tools::{JsonWriteTool, Tool, ToolRegistry, WebSearchTool, args};

pub const RESEARCHER: &str = "researcher";
pub const WRITER: &str = "writer";
pub const CRITIC: &str = "critic";

const DRAFT_LIMIT_CHARS: usize = 500;
const VERDICT: &str = "Looks coherent; add references.";

/// Searches the goal title and hands the findings to the writer.
pub struct Researcher {
    search: Arc<dyn Tool>,
}

#[async_trait]
impl Agent for Researcher {
    fn name(&self) -> &str {
        RESEARCHER
    }

    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult> {
        let found = self
            .search
            .call(&args(json!({ "query": goal.title, "top_k": 2 })))
            .await
            .context("web search")?;
        let lines: Vec<&str> = found
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        ctx.store.bump_metric(RUNS_COMPLETED, 1);
        Ok(StepResult::success(&goal.id, RESEARCHER, lines.join("\n"))
            .with_artifact("sources", found))
    }

    async fn reflect(&self, goal: &Goal, result: &StepResult, ctx: &AgentContext) -> Result<()> {
        log_reflection(ctx, RESEARCHER, goal, result);
        Ok(())
    }

    async fn propose_subgoals(
        &self,
        goal: &Goal,
        result: &StepResult,
        _ctx: &AgentContext,
    ) -> Result<Vec<Goal>> {
        if !result.success {
            return Ok(Vec::new());
        }
        Ok(vec![
            Goal::new(format!("Write: {}", goal.title))
                .description(result.content.clone())
                .owned_by(WRITER)
                .priority(Priority::High)
                .depends_on(&goal.id),
        ])
    }
}

/// Writes a draft file from the goal description.
pub struct Writer {
    json_write: Arc<dyn Tool>,
}

#[async_trait]
impl Agent for Writer {
    fn name(&self) -> &str {
        WRITER
    }

    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult> {
        let draft: String = goal.description.chars().take(DRAFT_LIMIT_CHARS).collect();
        let path = format!("artifacts/draft-{}.json", goal.id);
        let written = self
            .json_write
            .call(&args(json!({ "path": path, "content": draft })))
            .await
            .context("write draft")?;
        let written = written.as_str().unwrap_or(&path).to_string();
        ctx.store.bump_metric(RUNS_COMPLETED, 1);
        Ok(StepResult::success(&goal.id, WRITER, format!("Draft at {written}"))
            .with_artifact("draft_path", json!(written)))
    }

    async fn reflect(&self, goal: &Goal, result: &StepResult, ctx: &AgentContext) -> Result<()> {
        log_reflection(ctx, WRITER, goal, result);
        Ok(())
    }

    async fn propose_subgoals(
        &self,
        goal: &Goal,
        result: &StepResult,
        _ctx: &AgentContext,
    ) -> Result<Vec<Goal>> {
        if !result.success {
            return Ok(Vec::new());
        }
        Ok(vec![
            Goal::new(format!("Review: {}", goal.title))
                .description(result.content.clone())
                .owned_by(CRITIC)
                .depends_on(&goal.id),
        ])
    }
}

pub struct Critic;

#[async_trait]
impl Agent for Critic {
    fn name(&self) -> &str {
        CRITIC
    }

    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult> {
        ctx.store.bump_metric(RUNS_COMPLETED, 1);
        Ok(StepResult::success(&goal.id, CRITIC, VERDICT))
    }

    async fn reflect(&self, goal: &Goal, result: &StepResult, ctx: &AgentContext) -> Result<()> {
        log_reflection(ctx, CRITIC, goal, result);
        Ok(())
    }
}

/// Research team writing drafts under `workdir`.
pub fn build_team(workdir: &Path) -> Result<Team> {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(WebSearchTool::new()))?;
    tools.register(Arc::new(JsonWriteTool::new(workdir)))?;

    let mut agents = AgentRegistry::new();
    agents.register(Arc::new(Researcher {
        search: tools.get(WebSearchTool::NAME)?,
    }))?;
    agents.register(Arc::new(Writer {
        json_write: tools.get(JsonWriteTool::NAME)?,
    }))?;
    agents.register(Arc::new(Critic))?;

    let seeds = vec![
        Goal::new("Contrastive learning for multimodal retrieval")
            .owned_by(RESEARCHER)
            .priority(Priority::Critical),
        Goal::new("Survey recent RAG optimizations")
            .owned_by(RESEARCHER)
            .priority(Priority::High),
    ];
    Ok(Team { agents, seeds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_store;

    fn ctx() -> (tempfile::TempDir, AgentContext) {
        let (temp, store) = temp_store();
        (
            temp,
            AgentContext {
                world: json!({}),
                store,
            },
        )
    }

    #[tokio::test]
    async fn researcher_hands_off_to_writer() {
        let (_temp, ctx) = ctx();
        let researcher = Researcher {
            search: Arc::new(WebSearchTool::new()),
        };
        let goal = Goal::with_id("r1", "RAG");

        let result = researcher.act(&goal, &ctx).await.expect("act");
        assert_eq!(result.content, "Result 1 for 'RAG'\nResult 2 for 'RAG'");

        let subgoals = researcher
            .propose_subgoals(&goal, &result, &ctx)
            .await
            .expect("propose");
        assert_eq!(subgoals.len(), 1);
        assert_eq!(subgoals[0].title, "Write: RAG");
        assert_eq!(subgoals[0].owner_agent.as_deref(), Some(WRITER));
        assert_eq!(subgoals[0].dependencies, vec!["r1"]);
        assert_eq!(subgoals[0].description, result.content);
    }

    #[tokio::test]
    async fn writer_writes_truncated_draft() {
        let (temp, ctx) = ctx();
        let writer = Writer {
            json_write: Arc::new(JsonWriteTool::new(temp.path())),
        };
        let goal = Goal::with_id("w1", "Write: RAG").description("x".repeat(600));

        let result = writer.act(&goal, &ctx).await.expect("act");
        assert!(result.content.starts_with("Draft at "));

        let raw =
            std::fs::read_to_string(temp.path().join("artifacts/draft-w1.json")).expect("read");
        let value: Value = serde_json::from_str(&raw).expect("parse");
        assert_eq!(value["content"].as_str().map(str::len), Some(DRAFT_LIMIT_CHARS));
    }

    #[test]
    fn team_registers_three_agents_and_two_seeds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let team = build_team(temp.path()).expect("team");
        assert_eq!(team.agents.names(), vec![RESEARCHER, WRITER, CRITIC]);
        assert_eq!(team.seeds.len(), 2);
        assert!(team.seeds.iter().all(|g| g.dependencies.is_empty()));
    }
}
