//! Run context: the mutable state threaded through one workflow run.
//!
//! The context is shared by reference across concurrent branches, so the
//! per-step namespaces (`steps`, `errors`, `metadata`) use `DashMap` --
//! branches append under their own step ids and never contend on a global
//! lock. The accumulated output is a JSON object behind a mutex; output
//! mappings write disjoint dotted paths into it.
//!
//! Map steps run each item against a sub-context: a shallow clone of
//! {steps, errors, metadata} with the item as input and a fresh output.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value, json};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Dotted-path helpers
// ---------------------------------------------------------------------------

/// Resolve a dotted path against a JSON value. Missing segments yield
/// `None`, never an error.
pub(crate) fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |value, segment| value.get(segment))
}

/// Set a dotted path inside a JSON object, creating intermediate objects as
/// needed. Existing sibling keys are preserved; a non-object intermediate is
/// replaced.
pub(crate) fn insert_path(root: &mut Value, path: &str, value: Value) {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        let entry = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }
}

/// Lock helper that recovers from poisoning instead of panicking.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Mutable per-run record carrying input, per-step results, accumulated
/// output, and errors. Created once per top-level `execute` call and never
/// shared between concurrent top-level runs.
#[derive(Debug)]
pub struct RunContext {
    /// Time-sortable run id.
    pub run_id: Uuid,
    input: Value,
    steps: DashMap<String, Value>,
    errors: DashMap<String, String>,
    metadata: DashMap<String, Value>,
    output: Mutex<Value>,
    current_step: Mutex<Option<String>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl RunContext {
    /// Create a fresh context for a run with the given input.
    pub fn new(input: Value) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            input,
            steps: DashMap::new(),
            errors: DashMap::new(),
            metadata: DashMap::new(),
            output: Mutex::new(Value::Object(Map::new())),
            current_step: Mutex::new(None),
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
        }
    }

    /// The workflow's original input.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Mark the run as started.
    pub fn start(&self) {
        *lock(&self.started_at) = Some(Utc::now());
    }

    /// Mark the run as finished.
    pub fn finish(&self) {
        *lock(&self.finished_at) = Some(Utc::now());
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.started_at)
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.finished_at)
    }

    /// Record the step currently executing.
    pub fn set_current(&self, step_id: &str) {
        *lock(&self.current_step) = Some(step_id.to_string());
    }

    /// The id of the step currently executing, if any.
    pub fn current(&self) -> Option<String> {
        lock(&self.current_step).clone()
    }

    // -- steps ------------------------------------------------------------

    /// Store a step's result under its id.
    pub fn record_result(&self, step_id: &str, result: Value) {
        self.steps.insert(step_id.to_string(), result);
    }

    /// A step's stored result.
    pub fn step_result(&self, step_id: &str) -> Option<Value> {
        self.steps.get(step_id).map(|entry| entry.value().clone())
    }

    /// Ids of all steps with a stored result.
    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of steps with a stored result.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    // -- errors -----------------------------------------------------------

    /// Record a captured error under the failing step's id.
    pub fn record_error(&self, step_id: &str, error: &str) {
        self.errors.insert(step_id.to_string(), error.to_string());
    }

    /// A step's captured error message.
    pub fn error(&self, step_id: &str) -> Option<String> {
        self.errors.get(step_id).map(|entry| entry.value().clone())
    }

    // -- metadata ---------------------------------------------------------

    /// Set a free-form metadata entry.
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// A metadata entry.
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.get(key).map(|entry| entry.value().clone())
    }

    // -- output -----------------------------------------------------------

    /// Write a value at a dotted path inside the accumulated output,
    /// creating intermediate objects and preserving sibling keys.
    pub fn write_output(&self, path: &str, value: Value) {
        insert_path(&mut lock(&self.output), path, value);
    }

    /// Shallow-merge an object's keys into the accumulated output.
    /// Non-object values are ignored.
    pub fn merge_output(&self, value: &Value) {
        if let Some(incoming) = value.as_object() {
            let mut output = lock(&self.output);
            if let Some(target) = output.as_object_mut() {
                for (key, val) in incoming {
                    target.insert(key.clone(), val.clone());
                }
            }
        }
    }

    /// Snapshot of the accumulated output.
    pub fn output(&self) -> Value {
        lock(&self.output).clone()
    }

    // -- views ------------------------------------------------------------

    /// Build the JSON view predicates and dotted references resolve
    /// against: `{ input, steps, output, metadata }`.
    pub fn view(&self) -> Value {
        let steps: Map<String, Value> = self
            .steps
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let metadata: Map<String, Value> = self
            .metadata
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        json!({
            "input": self.input,
            "steps": steps,
            "output": self.output(),
            "metadata": metadata,
        })
    }

    /// Resolve a dotted reference against the context view. Missing path
    /// segments yield null, never an error.
    pub fn resolve_path(&self, path: &str) -> Value {
        lookup_path(&self.view(), path).cloned().unwrap_or(Value::Null)
    }

    /// Build the per-item sub-context a Map step runs its iterator in:
    /// {steps, errors, metadata} shallow-cloned, `input` replaced by the
    /// item, output reset to empty. The run id is inherited.
    pub fn sub_context(&self, item: Value) -> Self {
        Self {
            run_id: self.run_id,
            input: item,
            steps: self
                .steps
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            errors: self
                .errors
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            metadata: self
                .metadata
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            output: Mutex::new(Value::Object(Map::new())),
            current_step: Mutex::new(None),
            started_at: Mutex::new(self.started_at()),
            finished_at: Mutex::new(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
