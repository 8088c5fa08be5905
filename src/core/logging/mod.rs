//! Durable Log Module
//!
//! Append-only JSONL log of engine activity, one file per day, plus a
//! bounded in-memory tail used for diagnostic report export. This log is
//! separate from the tracing output; it records job-level facts that
//! outlive a session (submissions, state changes, failures) rather than
//! developer diagnostics.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{now_rfc3339, CoreResult, JobId};

/// Log severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One durable log entry
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// ISO 8601 timestamp
    pub timestamp: String,
    pub level: LogLevel,
    /// Subsystem that produced the entry (e.g. "jobs", "hwaccel")
    pub category: String,
    pub message: String,
    /// Structured payload (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Related job (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl LogEntry {
    pub fn new(level: LogLevel, category: &str, message: &str) -> Self {
        Self {
            timestamp: now_rfc3339(),
            level,
            category: category.to_string(),
            message: message.to_string(),
            data: None,
            job_id: None,
        }
    }

    pub fn with_job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

struct LogState {
    entries: VecDeque<LogEntry>,
}

/// Durable log store: daily JSONL file plus a bounded in-memory tail.
pub struct LogStore {
    dir: PathBuf,
    retention: usize,
    state: Mutex<LogState>,
}

impl LogStore {
    /// Open (or create) the log directory. Entries are appended to
    /// `transcodio-YYYY-MM-DD.log` inside it.
    pub fn open(dir: PathBuf, retention: usize) -> CoreResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            retention: retention.max(1),
            state: Mutex::new(LogState {
                entries: VecDeque::new(),
            }),
        })
    }

    fn current_file(&self) -> PathBuf {
        let date = chrono::Utc::now().format("%Y-%m-%d");
        self.dir.join(format!("transcodio-{date}.log"))
    }

    /// Append an entry. Disk failures are reported to tracing but never
    /// fail the caller; the in-memory tail is always updated.
    pub fn append(&self, entry: LogEntry) {
        if let Err(e) = self.write_line(&entry) {
            warn!(error = %e, "failed to append durable log entry");
        }

        let mut state = self.state.lock().unwrap();
        if state.entries.len() >= self.retention {
            state.entries.pop_front();
        }
        state.entries.push_back(entry);
    }

    fn write_line(&self, entry: &LogEntry) -> CoreResult<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_file())?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Most recent entries, oldest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        self.state.lock().unwrap().entries.iter().cloned().collect()
    }

    /// Build a diagnostic report: system facts plus the recent log tail
    /// and the supplied job snapshots, as a JSON value.
    pub fn export_report(&self, jobs: serde_json::Value) -> serde_json::Value {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        serde_json::json!({
            "generatedAt": now_rfc3339(),
            "system": {
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "hostname": host,
                "engineVersion": env!("CARGO_PKG_VERSION"),
            },
            "jobs": jobs,
            "recentEntries": self.recent(),
        })
    }
}
