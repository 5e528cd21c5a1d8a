//! Run configuration (TOML).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::planner::BatchOrder;

/// Ready-set ordering selectable from config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    #[default]
    Insertion,
    Priority,
}

impl From<OrderKind> for BatchOrder {
    fn from(kind: OrderKind) -> Self {
        match kind {
            OrderKind::Insertion => BatchOrder::Insertion,
            OrderKind::Priority => BatchOrder::Priority,
        }
    }
}

/// Orchestrator configuration.
///
/// Missing fields take their defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WeaverConfig {
    /// Flush target for the persisted state.
    pub state_file: PathBuf,

    /// Concurrency bound per iteration.
    pub batch_size: usize,

    /// Consecutive empty batches tolerated before the stall failsafe fires.
    pub stall_threshold: u32,

    /// Wall-clock budget for one dispatched batch.
    pub batch_timeout_secs: u64,

    /// Failed flushes the whole run tolerates before reporting a fault.
    pub flush_retries: u32,

    pub order: OrderKind,

    /// Apply planner rewrites (smaller batches after failures).
    pub adaptive_batch: bool,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("state.json"),
            batch_size: 3,
            stall_threshold: 1,
            batch_timeout_secs: 300,
            flush_retries: 3,
            order: OrderKind::Insertion,
            adaptive_batch: false,
        }
    }
}

impl WeaverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.state_file.as_os_str().is_empty() {
            return Err(anyhow!("state_file must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be > 0"));
        }
        if self.stall_threshold == 0 {
            return Err(anyhow!("stall_threshold must be > 0"));
        }
        if self.batch_timeout_secs == 0 {
            return Err(anyhow!("batch_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WeaverConfig::default()`.
pub fn load_config(path: &Path) -> Result<WeaverConfig> {
    if !path.exists() {
        let cfg = WeaverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WeaverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WeaverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, WeaverConfig::default());
        assert_eq!(cfg.batch_size, 3);
        assert_eq!(cfg.stall_threshold, 1);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("weaver.toml");
        let cfg = WeaverConfig {
            batch_size: 5,
            order: OrderKind::Priority,
            adaptive_batch: true,
            ..WeaverConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("weaver.toml");
        fs::write(&path, "batch_size = 7\norder = \"priority\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.batch_size, 7);
        assert_eq!(cfg.order, OrderKind::Priority);
        assert_eq!(cfg.state_file, PathBuf::from("state.json"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("weaver.toml");
        fs::write(&path, "batch_size = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("batch_size must be > 0"));
    }
}
