//! Orchestrator-level task types for stepweave.
//!
//! A `TaskDefinition` describes a goal-driven unit the orchestrator
//! decomposes into capability-matched subtasks. This module also holds the
//! analysis tuple returned by the pluggable task analyzer and the execution
//! log record types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default maximum number of orchestrator attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// TaskDefinition
// ---------------------------------------------------------------------------

/// A named evaluation criterion with an optional numeric threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    /// What this criterion measures.
    pub description: String,
    /// Optional per-criterion score threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// A goal-driven task handed to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique task name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// The goal the selected executors work toward.
    pub goal: String,
    /// Initial input value.
    #[serde(default)]
    pub input: Value,
    /// Optional expected-output schema or example.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<Value>,
    /// Required capability tags, in declaration order.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Named evaluation criteria.
    #[serde(default)]
    pub criteria: HashMap<String, Criterion>,
    /// Maximum number of execute/evaluate attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl TaskDefinition {
    /// A task with the given name and goal, no capabilities or criteria,
    /// and the default attempt budget.
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            goal: goal.into(),
            input: Value::Null,
            expected_output: None,
            capabilities: Vec::new(),
            criteria: HashMap::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn expected_output(mut self, expected: Value) -> Self {
        self.expected_output = Some(expected);
        self
    }

    /// Require a capability tag. Duplicates are ignored.
    pub fn require(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Declare an evaluation criterion.
    pub fn criterion(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        threshold: Option<f64>,
    ) -> Self {
        self.criteria.insert(
            name.into(),
            Criterion {
                description: description.into(),
                threshold,
            },
        );
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

// ---------------------------------------------------------------------------
// Task analysis
// ---------------------------------------------------------------------------

/// Estimated task complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// Decomposition strategy selected by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Atomic when the task needs at most one capability, otherwise one
    /// subtask per required capability.
    Auto,
    /// Always treat the task as a single unit.
    Atomic,
}

/// The complexity/strategy tuple produced by task analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub complexity: Complexity,
    pub strategy: Strategy,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Status of an orchestrator task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Severity of an execution-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One timestamped entry in an orchestrator run's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
