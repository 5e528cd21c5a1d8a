//! Coding team: architect -> coder / tester -> reviewer.
//!
//! The coder and tester write a small Python package under the workdir; the
//! tester runs `pytest` on it and the reviewer runs line-level static checks.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};

use super::{Agent, AgentContext, AgentRegistry, RUNS_COMPLETED, Team, log_reflection};
use crate::core::types::{Goal, Priority, StepResult};
use crate::io::process::{is_not_found, run_command_with_timeout};
use crate::tools::{
    Tool, ToolArgs, ToolError, ToolRegistry, args, optional_str, optional_u64, required_str,
    resolve_path, write_file,
};

pub const ARCHITECT: &str = "architect";
pub const CODER: &str = "coder";
pub const TESTER: &str = "tester";
pub const REVIEWER: &str = "reviewer";

const TEST_OUTPUT_LIMIT_BYTES: usize = 100_000;

static PRINT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bprint\(").unwrap_or_else(|err| panic!("print pattern: {err}"))
});

/// Writes plain text to a path under the workdir and returns the path.
#[derive(Debug, Clone)]
pub struct CodeWriteTool {
    root: PathBuf,
}

impl CodeWriteTool {
    pub const NAME: &'static str = "code_write";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for CodeWriteTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Write code files"
    }

    async fn call(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let path = required_str(Self::NAME, args, "path")?;
        let content = optional_str(Self::NAME, args, "content", "")?;
        write_file(Self::NAME, &resolve_path(&self.root, path), content)?;
        Ok(json!(path))
    }
}

/// Runs the test command with a timeout.
///
/// A missing test runner yields a simulated pass so the demo still completes.
#[derive(Debug, Clone)]
pub struct UnitTestTool {
    root: PathBuf,
    command: Vec<String>,
}

impl UnitTestTool {
    pub const NAME: &'static str = "unit_test";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_command(root, ["pytest", "-q", "tests"])
    }

    pub fn with_command<I, S>(root: impl Into<PathBuf>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root: root.into(),
            command: command.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Tool for UnitTestTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run unit tests with pytest"
    }

    async fn call(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let cwd = resolve_path(&self.root, optional_str(Self::NAME, args, "cwd", ".")?);
        let timeout = Duration::from_secs(optional_u64(Self::NAME, args, "timeout_s", 20)?);
        let Some((program, rest)) = self.command.split_first() else {
            return Err(ToolError::Failed {
                tool: Self::NAME.to_string(),
                message: "empty test command".to_string(),
            });
        };
        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(&cwd)
            .env("PYTEST_DISABLE_PLUGIN_AUTOLOAD", "1");

        let run = tokio::task::spawn_blocking(move || {
            run_command_with_timeout(cmd, timeout, TEST_OUTPUT_LIMIT_BYTES)
        })
        .await
        .map_err(|err| ToolError::Failed {
            tool: Self::NAME.to_string(),
            message: format!("test runner task failed: {err}"),
        })?;

        match run {
            Ok(output) => Ok(json!({
                "returncode": output.code(),
                "stdout": output.stdout_lossy(),
                "stderr": if output.timed_out {
                    format!("{program} timed out")
                } else {
                    output.stderr_lossy()
                },
            })),
            Err(err) if is_not_found(&err) => Ok(json!({
                "returncode": 0,
                "stdout": format!("[SIMULATED] {program} not found; assuming tests pass for demo."),
                "stderr": "",
            })),
            Err(err) => Err(ToolError::Failed {
                tool: Self::NAME.to_string(),
                message: format!("{err:#}"),
            }),
        }
    }
}

/// Line-level checks over `.py` files: module docstring, long lines, stray prints.
#[derive(Debug, Clone)]
pub struct StaticCheckTool {
    root: PathBuf,
}

impl StaticCheckTool {
    pub const NAME: &'static str = "static_check";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for StaticCheckTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run lightweight static checks"
    }

    async fn call(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let root = resolve_path(&self.root, optional_str(Self::NAME, args, "root", "gw_code")?);
        let max_len = optional_u64(Self::NAME, args, "max_len", 100)?;
        let max_len = usize::try_from(max_len).unwrap_or(usize::MAX);

        let mut files = Vec::new();
        collect_python_files(&root, &mut files);
        files.sort();

        let mut issues = Vec::new();
        for file in &files {
            check_file(file, max_len, &mut issues);
        }
        Ok(json!({ "ok": issues.is_empty(), "issues": issues }))
    }
}

fn collect_python_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_python_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "py") {
            out.push(path);
        }
    }
}

fn check_file(path: &Path, max_len: usize, issues: &mut Vec<String>) {
    let label = path.display();
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            issues.push(format!("{label}:0 Read error: {err}"));
            return;
        }
    };
    let lines: Vec<&str> = contents.lines().collect();
    if lines
        .first()
        .is_some_and(|first| !first.trim_start().starts_with("\"\"\""))
    {
        issues.push(format!("{label}:1 Missing top-level docstring"));
    }
    let is_script = lines.iter().take(5).any(|line| line.contains("__main__"));
    for (idx, line) in lines.iter().enumerate() {
        let lineno = idx + 1;
        if line.chars().count() > max_len {
            issues.push(format!("{label}:{lineno} Line exceeds {max_len} chars"));
        }
        if !is_script && PRINT_CALL.is_match(line) {
            issues.push(format!("{label}:{lineno} Avoid stray print() in library code"));
        }
    }
}

fn tool_named(tools: &[Arc<dyn Tool>], name: &str) -> Result<Arc<dyn Tool>> {
    tools
        .iter()
        .find(|tool| tool.name() == name)
        .cloned()
        .ok_or_else(|| anyhow!("agent lacks tool '{name}'"))
}

fn written_paths(paths: &[String]) -> Value {
    json!(paths)
}

pub struct ArchitectAgent;

#[async_trait]
impl Agent for ArchitectAgent {
    fn name(&self) -> &str {
        ARCHITECT
    }

    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult> {
        let design = format!(
            "Design spec for: {}\nRequirements:\n\
             - Clean, documented Python implementation.\n\
             - Deterministic behavior, unit tests, and basic style checks.\n",
            goal.title
        );
        ctx.store.bump_metric(RUNS_COMPLETED, 1);
        Ok(StepResult::success(&goal.id, ARCHITECT, design))
    }

    async fn reflect(&self, goal: &Goal, result: &StepResult, ctx: &AgentContext) -> Result<()> {
        log_reflection(ctx, ARCHITECT, goal, result);
        Ok(())
    }

    /// Implementation, then tests against it, then a review of both.
    async fn propose_subgoals(
        &self,
        goal: &Goal,
        result: &StepResult,
        _ctx: &AgentContext,
    ) -> Result<Vec<Goal>> {
        if !result.success {
            return Ok(Vec::new());
        }
        let implement = Goal::new(format!("Implement: {}", goal.title))
            .description(result.content.clone())
            .owned_by(CODER)
            .priority(Priority::Critical)
            .depends_on(&goal.id);
        let tests = Goal::new(format!("Write tests: {}", goal.title))
            .description(result.content.clone())
            .owned_by(TESTER)
            .priority(Priority::High)
            .depends_on(&goal.id)
            .depends_on(&implement.id);
        let review = Goal::new(format!("Review: {}", goal.title))
            .description("Run static checks and suggest improvements")
            .owned_by(REVIEWER)
            .depends_on(&implement.id)
            .depends_on(&tests.id);
        Ok(vec![implement, tests, review])
    }
}

pub struct CoderAgent {
    tools: Vec<Arc<dyn Tool>>,
}

#[async_trait]
impl Agent for CoderAgent {
    fn name(&self) -> &str {
        CODER
    }

    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult> {
        let write = tool_named(&self.tools, CodeWriteTool::NAME)?;
        for (path, content) in [
            ("gw_code/__init__.py", PACKAGE_MARKER),
            ("tests/__init__.py", TESTS_MARKER),
        ] {
            write
                .call(&args(json!({ "path": path, "content": content })))
                .await?;
        }

        let title = goal.title.to_lowercase();
        let mut targets = Vec::new();
        if title.contains("slugify") {
            targets.push(("gw_code/utils.py", SLUGIFY_IMPL.to_string()));
        }
        if title.contains("fibonacci") {
            targets.push(("gw_code/algos.py", FIBONACCI_IMPL.to_string()));
        }
        if targets.is_empty() {
            targets.push(("gw_code/module.py", module_scaffold(&goal.title)));
        }

        let mut files = Vec::new();
        for (path, content) in targets {
            write
                .call(&args(json!({ "path": path, "content": content })))
                .await
                .with_context(|| format!("write {path}"))?;
            files.push(path.to_string());
        }
        ctx.store.bump_metric(RUNS_COMPLETED, 1);
        Ok(StepResult::success(&goal.id, CODER, files.join("\n"))
            .with_artifact("files_written", written_paths(&files)))
    }

    async fn reflect(&self, goal: &Goal, result: &StepResult, ctx: &AgentContext) -> Result<()> {
        log_reflection(ctx, CODER, goal, result);
        Ok(())
    }
}

pub struct TesterAgent {
    tools: Vec<Arc<dyn Tool>>,
}

#[async_trait]
impl Agent for TesterAgent {
    fn name(&self) -> &str {
        TESTER
    }

    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult> {
        let write = tool_named(&self.tools, CodeWriteTool::NAME)?;
        let runner = tool_named(&self.tools, UnitTestTool::NAME)?;

        let title = goal.title.to_lowercase();
        let mut targets = Vec::new();
        if title.contains("slugify") {
            targets.push(("tests/test_utils.py", SLUGIFY_TESTS));
        }
        if title.contains("fibonacci") {
            targets.push(("tests/test_algos.py", FIBONACCI_TESTS));
        }
        if targets.is_empty() {
            targets.push(("tests/test_module.py", GENERIC_TEST));
        }
        let mut files = Vec::new();
        for (path, content) in targets {
            write
                .call(&args(json!({ "path": path, "content": content })))
                .await
                .with_context(|| format!("write {path}"))?;
            files.push(path.to_string());
        }

        let report = runner.call(&args(json!({ "cwd": "." }))).await?;
        let passed = report["returncode"].as_i64() == Some(0);
        let message = format!(
            "{}\n{}",
            report["stdout"].as_str().unwrap_or_default(),
            report["stderr"].as_str().unwrap_or_default()
        )
        .trim()
        .to_string();

        let result = StepResult {
            success: passed,
            ..StepResult::success(&goal.id, TESTER, message)
        }
        .with_artifact("files_written", written_paths(&files))
        .with_artifact("test_result", report);
        if passed {
            ctx.store.bump_metric(RUNS_COMPLETED, 1);
        }
        Ok(result)
    }

    async fn reflect(&self, goal: &Goal, result: &StepResult, ctx: &AgentContext) -> Result<()> {
        log_reflection(ctx, TESTER, goal, result);
        Ok(())
    }

    /// A failed run asks the coder for a fix.
    async fn propose_subgoals(
        &self,
        goal: &Goal,
        result: &StepResult,
        _ctx: &AgentContext,
    ) -> Result<Vec<Goal>> {
        if result.success {
            return Ok(Vec::new());
        }
        Ok(vec![
            Goal::new(format!("Fix failing tests for: {}", goal.title))
                .description(result.content.clone())
                .owned_by(CODER)
                .priority(Priority::High),
        ])
    }
}

pub struct ReviewerAgent {
    tools: Vec<Arc<dyn Tool>>,
}

#[async_trait]
impl Agent for ReviewerAgent {
    fn name(&self) -> &str {
        REVIEWER
    }

    async fn act(&self, goal: &Goal, ctx: &AgentContext) -> Result<StepResult> {
        let check = tool_named(&self.tools, StaticCheckTool::NAME)?;
        let report = check.call(&args(json!({ "root": "gw_code" }))).await?;
        let ok = report["ok"].as_bool().unwrap_or(false);
        let issues: Vec<&str> = report["issues"]
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let content = if issues.is_empty() {
            "No issues found.".to_string()
        } else {
            issues.join("\n")
        };
        if ok {
            ctx.store.bump_metric(RUNS_COMPLETED, 1);
        }
        let mut result = StepResult::success(&goal.id, REVIEWER, content);
        result.success = ok;
        Ok(result.with_artifact("static_check", report))
    }

    async fn reflect(&self, goal: &Goal, result: &StepResult, ctx: &AgentContext) -> Result<()> {
        log_reflection(ctx, REVIEWER, goal, result);
        Ok(())
    }
}

/// Coding team writing its package under `workdir`.
pub fn build_team(workdir: &Path) -> Result<Team> {
    build_team_with_tests(workdir, UnitTestTool::new(workdir))
}

pub fn build_team_with_tests(workdir: &Path, unit_test: UnitTestTool) -> Result<Team> {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CodeWriteTool::new(workdir)))?;
    tools.register(Arc::new(unit_test))?;
    tools.register(Arc::new(StaticCheckTool::new(workdir)))?;

    let mut agents = AgentRegistry::new();
    agents.register(Arc::new(ArchitectAgent))?;
    agents.register(Arc::new(CoderAgent {
        tools: vec![tools.get(CodeWriteTool::NAME)?],
    }))?;
    agents.register(Arc::new(TesterAgent {
        tools: vec![tools.get(CodeWriteTool::NAME)?, tools.get(UnitTestTool::NAME)?],
    }))?;
    agents.register(Arc::new(ReviewerAgent {
        tools: vec![tools.get(StaticCheckTool::NAME)?],
    }))?;

    let seeds = vec![
        Goal::new("Build utility: slugify")
            .owned_by(ARCHITECT)
            .priority(Priority::Critical),
        Goal::new("Build module: fibonacci with memoization")
            .owned_by(ARCHITECT)
            .priority(Priority::High),
    ];
    Ok(Team { agents, seeds })
}

fn module_scaffold(title: &str) -> String {
    format!(
        "\"\"\"\nModule scaffold for: {title}\n\"\"\"\n\n\
         def placeholder() -> str:\n    \
         \"\"\"Replace with the real implementation.\"\"\"\n    return \"ok\"\n"
    )
}

const SLUGIFY_IMPL: &str = r#""""
Utility helpers.
"""
import unicodedata


def slugify(text: str) -> str:
    """Convert text to a URL-friendly slug."""
    text = unicodedata.normalize("NFKD", str(text)).encode("ascii", "ignore").decode("ascii")
    out = []
    for ch in text.lower().strip():
        if ch.isalnum():
            out.append(ch)
        elif ch in " _-" and out and out[-1] != "-":
            out.append("-")
    return "".join(out).strip("-")
"#;

const FIBONACCI_IMPL: &str = r#""""
Algorithms.
"""
from functools import cache


def fib(n: int) -> int:
    """Return the n-th Fibonacci number (0-indexed) using memoization."""
    if n < 0:
        raise ValueError("n must be non-negative")

    @cache
    def _f(k: int) -> int:
        return k if k < 2 else _f(k - 1) + _f(k - 2)

    return _f(n)
"#;

const SLUGIFY_TESTS: &str = r#"from gw_code.utils import slugify


def test_slugify_basic():
    assert slugify("Hello World") == "hello-world"


def test_slugify_accents():
    assert slugify("Cafe-au-lait") == "cafe-au-lait"
"#;

const FIBONACCI_TESTS: &str = r#"import pytest
from gw_code.algos import fib


def test_fib_small():
    assert fib(10) == 55


def test_fib_raises():
    with pytest.raises(ValueError):
        fib(-1)
"#;

const PACKAGE_MARKER: &str = "\"\"\"generated by goalweaver\"\"\"\n";
const TESTS_MARKER: &str = "\"\"\"tests package marker\"\"\"\n";

const GENERIC_TEST: &str = "def test_placeholder():\n    assert True\n";

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
    async fn architect_proposes_ordered_pipeline() {
        let (_temp, ctx) = ctx();
        let goal = Goal::with_id("a1", "Build utility: slugify");
        let result = ArchitectAgent.act(&goal, &ctx).await.expect("act");
        let subgoals = ArchitectAgent
            .propose_subgoals(&goal, &result, &ctx)
            .await
            .expect("propose");

        let owners: Vec<_> = subgoals
            .iter()
            .map(|g| g.owner_agent.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(owners, vec![CODER, TESTER, REVIEWER]);
        assert_eq!(subgoals[1].dependencies, vec!["a1".to_string(), subgoals[0].id.clone()]);
        assert_eq!(
            subgoals[2].dependencies,
            vec![subgoals[0].id.clone(), subgoals[1].id.clone()]
        );
    }

    #[tokio::test]
    async fn coder_writes_matching_module() {
        let (temp, ctx) = ctx();
        let coder = CoderAgent {
            tools: vec![Arc::new(CodeWriteTool::new(temp.path()))],
        };
        let goal = Goal::with_id("c1", "Implement: Build module: fibonacci with memoization");
        let result = coder.act(&goal, &ctx).await.expect("act");

        assert_eq!(result.content, "gw_code/algos.py");
        assert!(temp.path().join("gw_code/algos.py").exists());
        assert!(temp.path().join("tests/__init__.py").exists());
    }

    #[tokio::test]
    async fn missing_test_runner_simulates_pass() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = UnitTestTool::with_command(temp.path(), ["goalweaver-missing-test-runner"]);
        let report = tool.call(&ToolArgs::new()).await.expect("call");
        assert_eq!(report["returncode"], 0);
        assert!(
            report["stdout"]
                .as_str()
                .unwrap_or_default()
                .starts_with("[SIMULATED]")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tests_fail_goal_and_request_fix() {
        let (temp, ctx) = ctx();
        let tester = TesterAgent {
            tools: vec![
                Arc::new(CodeWriteTool::new(temp.path())),
                Arc::new(UnitTestTool::with_command(temp.path(), ["false"])),
            ],
        };
        let goal = Goal::with_id("t1", "Write tests: slugify");
        let result = tester.act(&goal, &ctx).await.expect("act");
        assert!(!result.success);
        assert!(temp.path().join("tests/test_utils.py").exists());

        let fixes = tester
            .propose_subgoals(&goal, &result, &ctx)
            .await
            .expect("propose");
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].owner_agent.as_deref(), Some(CODER));
        assert!(fixes[0].dependencies.is_empty());
    }

    #[tokio::test]
    async fn static_check_reports_line_issues() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pkg = temp.path().join("gw_code");
        fs::create_dir_all(&pkg).expect("mkdir");
        fs::write(pkg.join("good.py"), "\"\"\"Doc.\"\"\"\nx = 1\n").expect("write");
        fs::write(pkg.join("bad.py"), format!("x = 1\nprint(x)\n{}\n", "y".repeat(120)))
            .expect("write");

        let tool = StaticCheckTool::new(temp.path());
        let report = tool.call(&ToolArgs::new()).await.expect("call");
        assert_eq!(report["ok"], false);
        let issues: Vec<&str> = report["issues"]
            .as_array()
            .expect("issues")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(issues.len(), 3);
        assert!(issues[0].ends_with("bad.py:1 Missing top-level docstring"));
        assert!(issues[1].ends_with("bad.py:2 Avoid stray print() in library code"));
        assert!(issues[2].ends_with("bad.py:3 Line exceeds 100 chars"));
    }

    #[test]
    fn templates_pass_static_check_rules() {
        for template in [SLUGIFY_IMPL, FIBONACCI_IMPL] {
            assert!(template.starts_with("\"\"\""));
            assert!(template.lines().all(|line| line.chars().count() <= 100));
            assert!(!PRINT_CALL.is_match(template));
        }
        assert!(module_scaffold("x").starts_with("\"\"\""));
    }
}
