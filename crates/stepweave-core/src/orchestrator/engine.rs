//! The decompose/dispatch/evaluate loop.
//!
//! One attempt: analyze the task, decompose it into capability-matched
//! subtasks, dispatch each sequentially against the first matching agent
//! while threading an accumulated-data object, aggregate, then score the
//! aggregate against the task's criteria. A failed evaluation with budget
//! left recurses with the prior result and feedback folded into the input;
//! an exhausted budget returns the aggregate annotated with the evaluation
//! detail instead of failing. Exceptions are not retried.
//!
//! The attempt counter is threaded explicitly through the recursion; each
//! attempt's fresh `ExecutionContext` only links to its predecessor for
//! diagnostics.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use stepweave_types::event::EngineEvent;
use stepweave_types::task::{LogLevel, TaskDefinition};

use crate::error::EngineError;
use crate::hooks::HookDispatcher;
use crate::orchestrator::agents::{AgentRegistry, AgentRequest};
use crate::orchestrator::context::ExecutionContext;
use crate::orchestrator::evaluate::{
    CompletenessEvaluator, Evaluation, Evaluator, EvaluatorDyn,
};
use crate::orchestrator::planner::{HeuristicAnalyzer, TaskAnalyzer, decompose, normalize_input};

/// Feedback string folded into the input of a retry attempt.
const RETRY_FEEDBACK: &str =
    "Previous attempt did not meet the evaluation criteria. Review the scores and improve the result.";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the evaluation stage.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// When false, every attempt passes trivially.
    pub evaluation_enabled: bool,
    /// Minimum average criterion score to pass.
    pub pass_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            evaluation_enabled: true,
            pass_threshold: 0.7,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of an orchestrated task run.
#[derive(Debug, Clone)]
pub struct TaskRunResult {
    /// The aggregate, annotated with the evaluation detail when the attempt
    /// budget ran out without a pass.
    pub output: Value,
    /// Verdict of the final attempt.
    pub evaluation: Evaluation,
    /// Number of attempts consumed, 1-based.
    pub attempts: u32,
    /// Bookkeeping of the final attempt.
    pub context: ExecutionContext,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs goal-driven tasks against registered agents.
///
/// Cheap to clone; clones share registries, hooks, and the pluggable
/// analyzer and evaluator.
#[derive(Clone)]
pub struct Orchestrator {
    agents: Arc<AgentRegistry>,
    hooks: Arc<HookDispatcher>,
    analyzer: Arc<dyn TaskAnalyzer>,
    evaluator: Arc<dyn EvaluatorDyn>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// An orchestrator with the fixed-heuristic analyzer, the presence-based
    /// evaluator, and default config.
    pub fn new(agents: Arc<AgentRegistry>, hooks: Arc<HookDispatcher>) -> Self {
        Self {
            agents,
            hooks,
            analyzer: Arc::new(HeuristicAnalyzer),
            evaluator: Arc::new(CompletenessEvaluator),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_analyzer<A: TaskAnalyzer + 'static>(mut self, analyzer: A) -> Self {
        self.analyzer = Arc::new(analyzer);
        self
    }

    pub fn with_evaluator<E: Evaluator + 'static>(mut self, evaluator: E) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute a task to completion: decompose, dispatch, evaluate, and
    /// retry with feedback while the attempt budget allows.
    pub async fn execute_task(
        &self,
        task: &TaskDefinition,
        input: Value,
    ) -> Result<TaskRunResult, EngineError> {
        self.execute_attempt(task.clone(), input, 1, None).await
    }

    /// One attempt. Boxed for the retry recursion.
    fn execute_attempt(
        &self,
        task: TaskDefinition,
        input: Value,
        attempt: u32,
        parent_run_id: Option<Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<TaskRunResult, EngineError>> + Send>> {
        let this = self.clone();
        Box::pin(async move {
            let mut ctx = ExecutionContext::new(input.clone(), parent_run_id);
            ctx.mark_running();
            ctx.log(
                LogLevel::Info,
                format!("starting task '{}' (attempt {attempt}/{})", task.name, task.max_attempts),
                None,
            );
            this.hooks
                .dispatch(&EngineEvent::TaskStarted {
                    run_id: ctx.run_id,
                    task: task.name.clone(),
                    attempt,
                })
                .await;

            let outcome = this.run_attempt(&task, &input, &mut ctx).await;
            let (aggregate, evaluation) = match outcome {
                Ok(pair) => pair,
                Err(err) => {
                    ctx.log(LogLevel::Error, format!("task failed: {err}"), None);
                    ctx.fail();
                    this.hooks
                        .dispatch(&EngineEvent::TaskFailed {
                            run_id: ctx.run_id,
                            task: task.name.clone(),
                            error: err.to_string(),
                        })
                        .await;
                    return Err(err);
                }
            };

            if evaluation.passed {
                ctx.complete();
                this.hooks
                    .dispatch(&EngineEvent::TaskCompleted {
                        run_id: ctx.run_id,
                        task: task.name.clone(),
                        result: aggregate.clone(),
                    })
                    .await;
                return Ok(TaskRunResult {
                    output: aggregate,
                    evaluation,
                    attempts: attempt,
                    context: ctx,
                });
            }

            if attempt < task.max_attempts {
                ctx.log(
                    LogLevel::Warn,
                    format!("evaluation scored {:.2}, retrying with feedback", evaluation.score),
                    serde_json::to_value(&evaluation).ok(),
                );
                ctx.complete();
                let retry_input = augment_with_feedback(&input, &aggregate, &evaluation);
                return this
                    .execute_attempt(task, retry_input, attempt + 1, Some(ctx.run_id))
                    .await;
            }

            // Budget spent: hand back the best effort, annotated.
            ctx.log(
                LogLevel::Warn,
                format!("attempt budget exhausted after {attempt} attempts"),
                serde_json::to_value(&evaluation).ok(),
            );
            let annotated = annotate_exhausted(aggregate, &evaluation, attempt);
            ctx.complete();
            this.hooks
                .dispatch(&EngineEvent::TaskCompleted {
                    run_id: ctx.run_id,
                    task: task.name.clone(),
                    result: annotated.clone(),
                })
                .await;
            Ok(TaskRunResult {
                output: annotated,
                evaluation,
                attempts: attempt,
                context: ctx,
            })
        })
    }

    /// Analyze, decompose, dispatch sequentially, aggregate, evaluate.
    async fn run_attempt(
        &self,
        task: &TaskDefinition,
        input: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<(Value, Evaluation), EngineError> {
        let analysis = self.analyzer.analyze(task);
        let subtasks = decompose(task, analysis);
        ctx.subtasks = subtasks.iter().map(|subtask| subtask.name.clone()).collect();
        ctx.log(
            LogLevel::Debug,
            format!("decomposed into {} subtask(s)", subtasks.len()),
            serde_json::to_value(&analysis).ok(),
        );

        // Accumulated data: the input baseline each dispatch extends.
        let mut accumulated = to_object(input);
        let mut ordered: Vec<(String, Value)> = Vec::with_capacity(subtasks.len());

        for subtask in &subtasks {
            let agent = self.agents.find(&subtask.capabilities)?;
            ctx.assignments
                .insert(subtask.name.clone(), agent.name().to_string());
            ctx.log(
                LogLevel::Info,
                format!("dispatching '{}' to agent '{}'", subtask.name, agent.name()),
                None,
            );

            let body = normalize_input(
                &subtask.capabilities,
                &subtask.goal,
                &Value::Object(accumulated.clone()),
            );
            let request = AgentRequest {
                task: subtask.name.clone(),
                goal: subtask.goal.clone(),
                body,
                tools: subtask.capabilities.clone(),
            };
            let result = agent.execute_boxed(request).await?;

            ctx.results.insert(subtask.name.clone(), result.clone());
            merge_into(&mut accumulated, &subtask.name, &result);
            ordered.push((subtask.name.clone(), result));
        }

        let aggregate = aggregate(ordered);
        let evaluation = self.evaluate(task, &aggregate).await;
        ctx.log(
            LogLevel::Info,
            format!(
                "evaluation {} with score {:.2}",
                if evaluation.passed { "passed" } else { "failed" },
                evaluation.score
            ),
            None,
        );
        Ok((aggregate, evaluation))
    }

    /// Score an aggregate. Disabled evaluation or an empty criteria set
    /// passes trivially.
    async fn evaluate(&self, task: &TaskDefinition, result: &Value) -> Evaluation {
        if !self.config.evaluation_enabled || task.criteria.is_empty() {
            return Evaluation::trivial_pass();
        }
        let scores = self.evaluator.score_boxed(task, result).await;
        let score = if scores.is_empty() {
            1.0
        } else {
            scores.values().sum::<f64>() / scores.len() as f64
        };
        let passed = score >= self.config.pass_threshold;
        Evaluation {
            passed,
            score,
            criterion_scores: scores,
            feedback: (!passed).then(|| RETRY_FEEDBACK.to_string()),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.agents)
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Aggregation helpers
// ---------------------------------------------------------------------------

fn to_object(input: &Value) -> Map<String, Value> {
    match input.as_object() {
        Some(map) => map.clone(),
        None => {
            let mut map = Map::new();
            if !input.is_null() {
                map.insert("input".to_string(), input.clone());
            }
            map
        }
    }
}

/// Fold one subtask result into the accumulated-data object. Object results
/// shallow-merge their keys; anything else lands under the subtask's name.
fn merge_into(accumulated: &mut Map<String, Value>, subtask: &str, result: &Value) {
    match result.as_object() {
        Some(map) => {
            for (key, value) in map {
                accumulated.insert(key.clone(), value.clone());
            }
        }
        None => {
            accumulated.insert(subtask.to_string(), result.clone());
        }
    }
}

/// A single result is returned unmodified; several shallow-merge in
/// dispatch order, later subtasks overwriting overlapping keys.
fn aggregate(ordered: Vec<(String, Value)>) -> Value {
    if ordered.len() == 1 {
        return ordered.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
    }
    let mut merged = Map::new();
    for (name, result) in &ordered {
        merge_into(&mut merged, name, result);
    }
    Value::Object(merged)
}

/// Fold the prior attempt's outcome into the next attempt's input.
fn augment_with_feedback(input: &Value, aggregate: &Value, evaluation: &Evaluation) -> Value {
    let mut body = to_object(input);
    body.insert(
        "_previous_attempt".to_string(),
        json!({
            "result": aggregate,
            "evaluation": serde_json::to_value(evaluation).unwrap_or(Value::Null),
            "feedback": RETRY_FEEDBACK,
        }),
    );
    Value::Object(body)
}

/// Annotate a best-effort aggregate after the budget ran out.
fn annotate_exhausted(aggregate: Value, evaluation: &Evaluation, attempts: u32) -> Value {
    let mut body = match aggregate {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    body.insert(
        "_warning".to_string(),
        json!(format!("evaluation did not pass after {attempts} attempt(s)")),
    );
    body.insert(
        "_evaluation".to_string(),
        serde_json::to_value(evaluation).unwrap_or(Value::Null),
    );
    Value::Object(body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::agents::agent_fn;
    use std::collections::HashMap;

    fn orchestrator(agents: AgentRegistry) -> Orchestrator {
        Orchestrator::new(Arc::new(agents), Arc::new(HookDispatcher::new()))
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn atomic_task_returns_single_result_unmodified() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("researcher", ["research"], |_| async {
            Ok(json!({ "findings": ["a", "b"] }))
        }));

        let task = TaskDefinition::new("lookup", "find sources").require("research");
        let run = orchestrator(agents)
            .execute_task(&task, json!({ "topic": "rust" }))
            .await
            .unwrap();

        assert_eq!(run.output, json!({ "findings": ["a", "b"] }));
        assert_eq!(run.attempts, 1);
        assert!(run.evaluation.passed);
        assert_eq!(run.context.assignments["lookup"], "researcher");
    }

    #[tokio::test]
    async fn multi_capability_results_merge_in_dispatch_order() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("researcher", ["research"], |_| async {
            Ok(json!({ "a": 1, "b": 1 }))
        }));
        agents.register(agent_fn("writer", ["write"], |_| async {
            Ok(json!({ "b": 2 }))
        }));

        let task = TaskDefinition::new("digest", "produce a digest")
            .require("research")
            .require("write");
        let run = orchestrator(agents)
            .execute_task(&task, Value::Null)
            .await
            .unwrap();

        assert_eq!(run.output, json!({ "a": 1, "b": 2 }));
        assert_eq!(run.context.subtasks, vec!["digest:research", "digest:write"]);
    }

    #[tokio::test]
    async fn later_subtasks_see_accumulated_data() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("researcher", ["research"], |_| async {
            Ok(json!({ "findings": "seven" }))
        }));
        agents.register(agent_fn("writer", ["write"], |request: AgentRequest| async move {
            // Sequential composition: the writer's body carries the
            // researcher's output.
            Ok(json!({ "draft": request.body["findings"] }))
        }));

        let task = TaskDefinition::new("digest", "goal")
            .require("research")
            .require("write");
        let run = orchestrator(agents)
            .execute_task(&task, Value::Null)
            .await
            .unwrap();

        assert_eq!(run.output["draft"], json!("seven"));
    }

    #[tokio::test]
    async fn unmatched_capability_is_fatal() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("writer", ["write"], |_| async { Ok(Value::Null) }));

        let task = TaskDefinition::new("lookup", "goal").require("research");
        let err = orchestrator(agents)
            .execute_task(&task, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoMatchingAgent(caps) if caps == vec!["research"]));
    }

    #[tokio::test]
    async fn research_alias_reaches_the_agent() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("researcher", ["research"], |request: AgentRequest| async move {
            Ok(json!({ "query_seen": request.body["query"] }))
        }));

        let task = TaskDefinition::new("lookup", "goal").require("research");
        let run = orchestrator(agents)
            .execute_task(&task, json!({ "topic": "tokio" }))
            .await
            .unwrap();
        assert_eq!(run.output["query_seen"], json!("tokio"));
    }

    // -----------------------------------------------------------------------
    // Evaluation and retry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn no_criteria_passes_trivially() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("worker", ["work"], |_| async { Ok(Value::Null) }));

        let task = TaskDefinition::new("anything", "goal").require("work");
        let run = orchestrator(agents)
            .execute_task(&task, Value::Null)
            .await
            .unwrap();
        assert!(run.evaluation.passed);
        assert_eq!(run.evaluation.score, 1.0);
    }

    #[tokio::test]
    async fn disabled_evaluation_skips_scoring() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("worker", ["work"], |_| async { Ok(json!({})) }));

        // Empty object would score 0.0 under the default evaluator.
        let task = TaskDefinition::new("anything", "goal")
            .require("work")
            .criterion("present", "result is non-empty", None);
        let run = orchestrator(agents)
            .with_config(OrchestratorConfig {
                evaluation_enabled: false,
                pass_threshold: 0.7,
            })
            .execute_task(&task, Value::Null)
            .await
            .unwrap();
        assert!(run.evaluation.passed);
        assert_eq!(run.attempts, 1);
    }

    struct KeywordEvaluator;

    impl Evaluator for KeywordEvaluator {
        fn score(
            &self,
            task: &TaskDefinition,
            result: &Value,
        ) -> impl std::future::Future<Output = HashMap<String, f64>> + Send {
            let hit = result["text"].as_str().is_some_and(|s| s.contains("final"));
            let scores: HashMap<String, f64> = task
                .criteria
                .keys()
                .map(|name| (name.clone(), if hit { 1.0 } else { 0.2 }))
                .collect();
            async move { scores }
        }
    }

    #[tokio::test]
    async fn failed_evaluation_retries_with_feedback() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("writer", ["write"], |request: AgentRequest| async move {
            // Improve once the prior attempt's feedback is visible.
            if request.body.get("_previous_attempt").is_some() {
                Ok(json!({ "text": "final draft" }))
            } else {
                Ok(json!({ "text": "rough draft" }))
            }
        }));

        let task = TaskDefinition::new("draft", "write the report")
            .require("write")
            .criterion("quality", "reads as final", None)
            .max_attempts(3);
        let run = orchestrator(agents)
            .with_evaluator(KeywordEvaluator)
            .execute_task(&task, json!({ "prompt": "report" }))
            .await
            .unwrap();

        assert_eq!(run.attempts, 2);
        assert!(run.evaluation.passed);
        assert_eq!(run.output["text"], json!("final draft"));
        assert!(run.context.parent_run_id.is_some());
    }

    #[tokio::test]
    async fn exhausted_budget_returns_annotated_aggregate() {
        let agents = AgentRegistry::new();
        agents.register(agent_fn("writer", ["write"], |_| async {
            Ok(json!({ "text": "rough draft" }))
        }));

        let task = TaskDefinition::new("draft", "write the report")
            .require("write")
            .criterion("quality", "reads as final", None)
            .max_attempts(2);
        let run = orchestrator(agents)
            .with_evaluator(KeywordEvaluator)
            .execute_task(&task, Value::Null)
            .await
            .unwrap();

        assert_eq!(run.attempts, 2);
        assert!(!run.evaluation.passed);
        assert_eq!(run.output["text"], json!("rough draft"));
        assert!(run.output["_warning"].as_str().is_some());
        assert_eq!(run.output["_evaluation"]["passed"], json!(false));
    }

    #[tokio::test]
    async fn agent_errors_are_not_retried() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let agents = AgentRegistry::new();
        let counter = Arc::clone(&calls);
        agents.register(agent_fn("broken", ["work"], move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(EngineError::Execution("agent crashed".to_string()))
            }
        }));

        let task = TaskDefinition::new("anything", "goal")
            .require("work")
            .max_attempts(3);
        let err = orchestrator(agents)
            .execute_task(&task, Value::Null)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Execution(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn task_events_carry_attempt_numbers() {
        use std::sync::Mutex;

        let agents = AgentRegistry::new();
        agents.register(agent_fn("writer", ["write"], |_| async {
            Ok(json!({ "text": "rough draft" }))
        }));

        let attempts: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&attempts);
        let mut hooks = HookDispatcher::new();
        hooks.register(crate::hooks::hook_fn(move |event: EngineEvent| {
            let sink = Arc::clone(&sink);
            async move {
                if let EngineEvent::TaskStarted { attempt, .. } = event {
                    sink.lock().unwrap().push(attempt);
                }
            }
        }));

        let task = TaskDefinition::new("draft", "goal")
            .require("write")
            .criterion("quality", "reads as final", None)
            .max_attempts(2);
        let run = Orchestrator::new(Arc::new(agents), Arc::new(hooks))
            .with_evaluator(KeywordEvaluator)
            .execute_task(&task, Value::Null)
            .await
            .unwrap();

        assert_eq!(run.attempts, 2);
        assert_eq!(*attempts.lock().unwrap(), vec![1, 2]);
    }
}
