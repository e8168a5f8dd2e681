//! Criterion scoring of aggregated results.
//!
//! Evaluators score a result against a task's declared criteria; the engine
//! averages the scores and applies its pass threshold. A failed evaluation
//! is a recoverable condition feeding the retry-with-feedback loop, not an
//! error.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use stepweave_types::task::TaskDefinition;

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// The verdict on one aggregated result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub passed: bool,
    /// Average of the per-criterion scores, 1.0 when nothing was scored.
    pub score: f64,
    pub criterion_scores: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl Evaluation {
    /// The trivial pass used when evaluation is disabled or a task declares
    /// no criteria.
    pub fn trivial_pass() -> Self {
        Self {
            passed: true,
            score: 1.0,
            criterion_scores: HashMap::new(),
            feedback: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator trait
// ---------------------------------------------------------------------------

/// Scores a result against each declared criterion, 0.0 to 1.0 per
/// criterion.
pub trait Evaluator: Send + Sync {
    fn score(
        &self,
        task: &TaskDefinition,
        result: &Value,
    ) -> impl Future<Output = HashMap<String, f64>> + Send;
}

/// Object-safe version of [`Evaluator`] with boxed futures.
pub trait EvaluatorDyn: Send + Sync {
    fn score_boxed<'a>(
        &'a self,
        task: &'a TaskDefinition,
        result: &'a Value,
    ) -> Pin<Box<dyn Future<Output = HashMap<String, f64>> + Send + 'a>>;
}

/// Blanket implementation: any `Evaluator` is an `EvaluatorDyn`.
impl<T: Evaluator> EvaluatorDyn for T {
    fn score_boxed<'a>(
        &'a self,
        task: &'a TaskDefinition,
        result: &'a Value,
    ) -> Pin<Box<dyn Future<Output = HashMap<String, f64>> + Send + 'a>> {
        Box::pin(self.score(task, result))
    }
}

// ---------------------------------------------------------------------------
// Default evaluator
// ---------------------------------------------------------------------------

/// Presence-based default: every criterion scores 1.0 when the result is
/// non-empty, 0.0 otherwise. A stand-in for model-backed scoring.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompletenessEvaluator;

fn non_empty(result: &Value) -> bool {
    match result {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

impl Evaluator for CompletenessEvaluator {
    fn score(
        &self,
        task: &TaskDefinition,
        result: &Value,
    ) -> impl Future<Output = HashMap<String, f64>> + Send {
        let score = if non_empty(result) { 1.0 } else { 0.0 };
        let scores: HashMap<String, f64> = task
            .criteria
            .keys()
            .map(|name| (name.clone(), score))
            .collect();
        async move { scores }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
