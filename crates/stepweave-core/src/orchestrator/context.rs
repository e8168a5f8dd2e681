//! Per-run execution record for orchestrated tasks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use stepweave_types::task::{LogEntry, LogLevel, TaskRunStatus};

/// Bookkeeping for one orchestrator attempt: decomposition, assignments,
/// per-subtask results, and an append-only diagnostic log.
///
/// Each retry attempt gets a fresh context linked to its predecessor via
/// `parent_run_id`; the attempt counter itself is threaded through the
/// engine's recursion, never derived from log contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    /// Run id of the previous attempt, when this context was created by the
    /// retry-with-feedback loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// The attempt's input as received.
    pub input: Value,
    /// Subtask name -> result.
    pub results: HashMap<String, Value>,
    /// Append-only diagnostic log.
    pub logs: Vec<LogEntry>,
    /// Subtask names in dispatch order.
    pub subtasks: Vec<String>,
    /// Subtask name -> selected agent name.
    pub assignments: HashMap<String, String>,
    pub status: TaskRunStatus,
}

impl ExecutionContext {
    pub fn new(input: Value, parent_run_id: Option<Uuid>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            parent_run_id,
            started_at: Utc::now(),
            finished_at: None,
            input,
            results: HashMap::new(),
            logs: Vec::new(),
            subtasks: Vec::new(),
            assignments: HashMap::new(),
            status: TaskRunStatus::Pending,
        }
    }

    /// Append a log entry, mirroring it to the tracing subscriber.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        let message = message.into();
        match level {
            LogLevel::Debug => {
                tracing::debug!(run_id = %self.run_id, "{message}");
            }
            LogLevel::Info => {
                tracing::info!(run_id = %self.run_id, "{message}");
            }
            LogLevel::Warn => {
                tracing::warn!(run_id = %self.run_id, "{message}");
            }
            LogLevel::Error => {
                tracing::error!(run_id = %self.run_id, "{message}");
            }
        }
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            data,
        });
    }

    pub fn mark_running(&mut self) {
        self.status = TaskRunStatus::Running;
    }

    pub fn complete(&mut self) {
        self.status = TaskRunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = TaskRunStatus::Failed;
        self.finished_at = Some(Utc::now());
    }
}
