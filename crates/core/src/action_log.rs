use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    LeadCreate,
    VisitSchedule,
    LeadUpdate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadCreate => "LEAD_CREATE",
            Self::VisitSchedule => "VISIT_SCHEDULE",
            Self::LeadUpdate => "LEAD_UPDATE",
        }
    }
}

/// One line of the action log. Entries are written once and never edited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub entities: Value,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl LogEntry {
    pub fn succeeded(action: ActionKind, entities: Value, output: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            entities,
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(action: ActionKind, entities: Value, error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            entities,
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionLogError {
    #[error("action log `{path}` is not writable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode action log entry: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait ActionLogSink: Send + Sync {
    fn append(&self, entry: LogEntry);
}

/// Append-only JSON-Lines file. Writers within the process are serialised so
/// lines never interleave.
#[derive(Debug)]
pub struct JsonlActionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlActionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the file for append (creating it and its parent directories)
    /// without writing anything.
    pub fn check_writable(&self) -> Result<(), ActionLogError> {
        self.open().map(|_| ())
    }

    pub fn try_append(&self, entry: &LogEntry) -> Result<(), ActionLogError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut file = self.open()?;
        file.write_all(line.as_bytes()).map_err(|source| self.io_error(source))
    }

    fn open(&self) -> Result<fs::File, ActionLogError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> ActionLogError {
        ActionLogError::Io { path: self.path.clone(), source }
    }
}

impl ActionLogSink for JsonlActionLog {
    fn append(&self, entry: LogEntry) {
        if let Err(error) = self.try_append(&entry) {
            warn!(
                event_name = "action_log.append.failed",
                action = entry.action.as_str(),
                path = %self.path.display(),
                error = %error,
                "failed to append action log entry"
            );
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryActionLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryActionLog {
    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ActionLogSink for InMemoryActionLog {
    fn append(&self, entry: LogEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
