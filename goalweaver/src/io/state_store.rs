//! Shared state store backed by the persisted state file.
//!
//! Logs, artifacts and metrics are buffered in memory and merged into the file
//! by [`SharedStateStore::flush`]. The goals section is replaced with the
//! caller's snapshot on every flush. Keys this store does not know about are
//! carried through unchanged.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::{Goal, LogEntry};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk representation of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub artifacts: Map<String, Value>,
    /// Any JSON number. Integer metrics are summed exactly.
    #[serde(default)]
    pub metrics: BTreeMap<String, Number>,
    /// Top-level keys owned by other writers.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersistedState {
    /// Integer value of a metric, if it has one.
    pub fn metric(&self, name: &str) -> Option<i64> {
        self.metrics.get(name).and_then(Number::as_i64)
    }
}

/// Add `delta` to a stored metric. Falls back to float addition when the
/// stored value is not an `i64` or the sum overflows.
fn add_metric(current: Option<&Number>, delta: i64) -> Number {
    let Some(current) = current else {
        return Number::from(delta);
    };
    if let Some(sum) = current.as_i64().and_then(|value| value.checked_add(delta)) {
        return Number::from(sum);
    }
    let sum = current.as_f64().unwrap_or_default() + delta as f64;
    Number::from_f64(sum).unwrap_or_else(|| current.clone())
}

/// Read a state file. A missing or blank file is an empty state.
pub fn read_state(path: &Path) -> Result<PersistedState, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PersistedState::default()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if contents.trim().is_empty() {
        return Ok(PersistedState::default());
    }
    serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Pretty JSON with a trailing newline, written via temp file + rename.
pub fn write_state(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let tmp_path = tmp_path(path);
    fs::write(&tmp_path, contents).map_err(io_error(&tmp_path))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_error(path)(err));
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + use<> {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Debug, Default)]
struct Buffers {
    logs: Vec<LogEntry>,
    artifacts: Map<String, Value>,
    metrics: BTreeMap<String, i64>,
}

impl Buffers {
    fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.artifacts.is_empty() && self.metrics.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    pending: Buffers,
    /// Every log appended through this store, flushed or not.
    history: Vec<LogEntry>,
    values: HashMap<String, Value>,
}

/// Buffered, lock-serialized writer for logs, artifacts and metrics.
///
/// A single lock covers buffer mutation and flush, so only one flush is in
/// flight and writes issued during a flush land in the next one.
#[derive(Debug)]
pub struct SharedStateStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl SharedStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_log(&self, entry: LogEntry) {
        let mut inner = self.lock();
        inner.history.push(entry.clone());
        inner.pending.logs.push(entry);
    }

    /// Last write wins per key, both in the buffer and on disk.
    pub fn record_artifact(&self, key: impl Into<String>, value: Value) {
        self.lock().pending.artifacts.insert(key.into(), value);
    }

    pub fn bump_metric(&self, name: impl Into<String>, delta: i64) {
        *self.lock().pending.metrics.entry(name.into()).or_insert(0) += delta;
    }

    /// In-memory value; never persisted.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().values.insert(key.into(), value);
    }

    /// All logs appended during this process, independent of flush timing.
    pub fn export_logs(&self) -> Vec<LogEntry> {
        self.lock().history.clone()
    }

    /// True when buffered changes are waiting for a flush.
    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    /// Merge buffered changes and `goals` into the state file.
    ///
    /// Buffers are cleared only after the rename succeeds. On error they are
    /// kept intact for the next call.
    #[instrument(skip_all, fields(path = %self.path.display(), goals = goals.len()))]
    pub fn flush(&self, goals: &[Goal]) -> Result<(), StoreError> {
        let mut inner = self.lock();

        let mut state = read_state(&self.path).inspect_err(|err| {
            warn!(err = %err, "state file unreadable; keeping buffers");
        })?;
        state.goals = goals.to_vec();
        state.logs.extend(inner.pending.logs.iter().cloned());
        for (key, value) in &inner.pending.artifacts {
            state.artifacts.insert(key.clone(), value.clone());
        }
        for (name, delta) in &inner.pending.metrics {
            let merged = add_metric(state.metrics.get(name), *delta);
            state.metrics.insert(name.clone(), merged);
        }

        write_state(&self.path, &state).inspect_err(|err| {
            warn!(err = %err, "state write failed; keeping buffers");
        })?;

        debug!(
            logs = inner.pending.logs.len(),
            artifacts = inner.pending.artifacts.len(),
            metrics = inner.pending.metrics.len(),
            "state flushed"
        );
        inner.pending = Buffers::default();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
