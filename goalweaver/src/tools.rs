//! Tool contract and registry.
//!
//! A tool is a named operation called with a JSON argument bag that returns a
//! JSON value. Tools are used by agents only; the orchestrator never sees them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Keyword arguments for a tool call.
pub type ToolArgs = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' not registered")]
    NotFound(String),
    #[error("tool '{0}' already registered")]
    Duplicate(String),
    #[error("{tool} requires argument '{name}: {expected}'")]
    MissingArgument {
        tool: String,
        name: String,
        expected: &'static str,
    },
    #[error("{tool} argument '{name}' must be {expected}")]
    InvalidArgument {
        tool: String,
        name: String,
        expected: &'static str,
    },
    #[error("{tool} failed: {message}")]
    Failed { tool: String, message: String },
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn call(&self, args: &ToolArgs) -> Result<Value, ToolError>;
}

/// Tools keyed by lowercased name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let key = tool.name().to_lowercase();
        if self.tools.contains_key(&key) {
            return Err(ToolError::Duplicate(tool.name().to_string()));
        }
        self.tools.insert(key, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list())
            .finish()
    }
}

/// Build an argument bag from a `json!` object literal.
pub fn args(value: Value) -> ToolArgs {
    match value {
        Value::Object(map) => map,
        _ => ToolArgs::new(),
    }
}

pub fn required_str<'a>(tool: &str, args: &'a ToolArgs, name: &str) -> Result<&'a str, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Err(ToolError::MissingArgument {
            tool: tool.to_string(),
            name: name.to_string(),
            expected: "str",
        }),
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ToolError::InvalidArgument {
            tool: tool.to_string(),
            name: name.to_string(),
            expected: "a string",
        }),
    }
}

pub fn optional_str<'a>(
    tool: &str,
    args: &'a ToolArgs,
    name: &str,
    default: &'a str,
) -> Result<&'a str, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => required_str(tool, args, name),
    }
}

pub fn optional_u64(
    tool: &str,
    args: &ToolArgs,
    name: &str,
    default: u64,
) -> Result<u64, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| ToolError::InvalidArgument {
            tool: tool.to_string(),
            name: name.to_string(),
            expected: "a non-negative integer",
        }),
    }
}

/// Resolve `path` against `root` unless it is absolute.
pub fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Write `contents` to `path`, creating parent directories.
pub fn write_file(tool: &str, path: &Path, contents: &str) -> Result<(), ToolError> {
    let failed = |err: std::io::Error| ToolError::Failed {
        tool: tool.to_string(),
        message: format!("write {}: {err}", path.display()),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(failed)?;
    }
    fs::write(path, contents).map_err(failed)
}

/// Stub search returning `top_k` canned results.
#[derive(Debug, Clone)]
pub struct WebSearchTool {
    latency: Duration,
}

impl WebSearchTool {
    pub const NAME: &'static str = "web_search";

    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(50),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Lightweight demo search"
    }

    async fn call(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let query = required_str(Self::NAME, args, "query")?;
        let top_k = optional_u64(Self::NAME, args, "top_k", 3)?;
        tokio::time::sleep(self.latency).await;
        let results: Vec<String> = (1..=top_k)
            .map(|i| format!("Result {i} for '{query}'"))
            .collect();
        Ok(json!(results))
    }
}

/// Writes `{"content": ..}` as pretty JSON and returns the written path.
#[derive(Debug, Clone)]
pub struct JsonWriteTool {
    root: PathBuf,
}

impl JsonWriteTool {
    pub const NAME: &'static str = "json_write";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for JsonWriteTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Write JSON file"
    }

    async fn call(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let path = required_str(Self::NAME, args, "path")?;
        let content = optional_str(Self::NAME, args, "content", "")?;
        let target = resolve_path(&self.root, path);
        let mut body = serde_json::to_string_pretty(&json!({ "content": content })).map_err(|err| {
            ToolError::Failed {
                tool: Self::NAME.to_string(),
                message: err.to_string(),
            }
        })?;
        body.push('\n');
        write_file(Self::NAME, &target, &body)?;
        Ok(json!(target.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_case_insensitive_and_sorted() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(WebSearchTool::new()))
            .expect("register");
        registry
            .register(Arc::new(JsonWriteTool::new(".")))
            .expect("register");

        assert_eq!(registry.list(), vec!["json_write", "web_search"]);
        assert_eq!(registry.get("WEB_SEARCH").expect("get").name(), "web_search");
        assert!(matches!(
            registry.get("missing"),
            Err(ToolError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_tool_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(WebSearchTool::new()))
            .expect("register");
        let err = registry
            .register(Arc::new(WebSearchTool::new()))
            .expect_err("duplicate");
        assert!(matches!(err, ToolError::Duplicate(name) if name == "web_search"));
    }

    #[tokio::test]
    async fn web_search_returns_top_k_results() {
        let tool = WebSearchTool::new();
        let value = tool
            .call(&args(json!({"query": "rust", "top_k": 2})))
            .await
            .expect("call");
        assert_eq!(value, json!(["Result 1 for 'rust'", "Result 2 for 'rust'"]));
    }

    #[tokio::test]
    async fn web_search_requires_query() {
        let err = WebSearchTool::new()
            .call(&ToolArgs::new())
            .await
            .expect_err("missing query");
        assert_eq!(err.to_string(), "web_search requires argument 'query: str'");
    }

    #[tokio::test]
    async fn json_write_creates_parent_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = JsonWriteTool::new(temp.path());
        tool.call(&args(json!({"path": "artifacts/draft.json", "content": "hello"})))
            .await
            .expect("call");

        let raw = fs::read_to_string(temp.path().join("artifacts/draft.json")).expect("read");
        let value: Value = serde_json::from_str(&raw).expect("parse");
        assert_eq!(value, json!({"content": "hello"}));
    }
}
