//! Step graph traversal and dispatch.
//!
//! The interpreter walks a `WorkflowDefinition` from its entry point,
//! dispatching on each step's config:
//!
//! - Task      -- resolve input, invoke the registered unit of work, apply
//!                the output mapping, honor gate and fixed-delay retries
//! - Parallel  -- launch branches as detached tasks; settle on all branches
//!                or on the first, per `wait_for_all`
//! - Condition -- evaluate a predicate against the context view and follow
//!                one of two branches
//! - Map       -- run an iterator step once per item in fixed-size batches,
//!                each item against its own sub-context
//! - Retry     -- re-execute a target step with exponential backoff and an
//!                optional veto predicate
//!
//! Branches launched concurrently are never cancelled: when a race settles
//! or a sibling fails, losing branches keep running to completion and their
//! context writes land. Callers that need cancellation must build it into
//! their units of work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{select_all, try_join_all};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use stepweave_types::event::EngineEvent;
use stepweave_types::workflow::{
    ConditionStep, InputSource, ItemSource, MapStep, NextStep, ParallelStep, RetryStep, Step,
    StepConfig, TaskStep, WorkflowDefinition,
};

use crate::error::EngineError;
use crate::hooks::HookDispatcher;
use crate::registry::TaskRegistry;
use crate::workflow::context::{RunContext, lookup_path};

/// Boxed recursive step future. Owned captures make it `'static` so steps
/// can be spawned as independent tasks.
type StepFuture = Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send>>;

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Executes workflow definitions against run contexts.
///
/// Cheap to clone; clones share the task registry and hook dispatcher.
#[derive(Clone)]
pub struct Interpreter {
    tasks: Arc<TaskRegistry>,
    hooks: Arc<HookDispatcher>,
}

impl Interpreter {
    pub fn new(tasks: Arc<TaskRegistry>, hooks: Arc<HookDispatcher>) -> Self {
        Self { tasks, hooks }
    }

    /// Execute a workflow from its entry point. The final output is the
    /// result of the last step on the traversed path.
    pub async fn execute(
        &self,
        definition: &Arc<WorkflowDefinition>,
        ctx: &Arc<RunContext>,
    ) -> Result<Value, EngineError> {
        let started = Instant::now();
        ctx.start();
        tracing::info!(
            run_id = %ctx.run_id,
            workflow = definition.id.as_str(),
            entrypoint = definition.entrypoint.as_str(),
            "workflow started"
        );
        self.hooks
            .dispatch(&EngineEvent::WorkflowStarted {
                run_id: ctx.run_id,
                workflow_id: definition.id.clone(),
                workflow_name: definition.name.clone(),
            })
            .await;

        let result = self
            .run_step(
                Arc::clone(definition),
                Arc::clone(ctx),
                definition.entrypoint.clone(),
            )
            .await;
        ctx.finish();

        match result {
            Ok(output) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    run_id = %ctx.run_id,
                    workflow = definition.id.as_str(),
                    duration_ms,
                    "workflow completed"
                );
                self.hooks
                    .dispatch(&EngineEvent::WorkflowCompleted {
                        run_id: ctx.run_id,
                        workflow_id: definition.id.clone(),
                        output: output.clone(),
                        duration_ms,
                    })
                    .await;
                Ok(output)
            }
            Err(err) => {
                tracing::error!(
                    run_id = %ctx.run_id,
                    workflow = definition.id.as_str(),
                    error = %err,
                    "workflow failed"
                );
                self.hooks
                    .dispatch(&EngineEvent::WorkflowFailed {
                        run_id: ctx.run_id,
                        workflow_id: definition.id.clone(),
                        error: err.to_string(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    // -- traversal --------------------------------------------------------

    /// Execute one step and follow its successors. Boxed for recursion and
    /// owned so branches can be spawned.
    fn run_step(
        &self,
        def: Arc<WorkflowDefinition>,
        ctx: Arc<RunContext>,
        step_id: String,
    ) -> StepFuture {
        let this = self.clone();
        Box::pin(async move {
            let step: Step = def
                .step(&step_id)
                .cloned()
                .ok_or_else(|| EngineError::StepNotFound(step_id.clone()))?;
            ctx.set_current(&step_id);
            let started = Instant::now();
            tracing::debug!(run_id = %ctx.run_id, step = step_id.as_str(), "step started");
            this.hooks
                .dispatch(&EngineEvent::StepStarted {
                    run_id: ctx.run_id,
                    step_id: step_id.clone(),
                })
                .await;

            // Task failures are reported per attempt inside run_task; other
            // step types report here.
            let is_task = matches!(step.config, StepConfig::Task(_));
            let result = match step.config {
                StepConfig::Task(cfg) => this.run_task(&ctx, &step_id, &cfg).await,
                StepConfig::Parallel(cfg) => this.run_parallel(&def, &ctx, &cfg).await,
                StepConfig::Condition(cfg) => this.run_condition(&def, &ctx, &cfg).await,
                StepConfig::Map(cfg) => this.run_map(&def, &ctx, &cfg).await,
                StepConfig::Retry(cfg) => this.run_retry(&def, &ctx, &cfg).await,
            };

            let value = match result {
                Ok(value) => value,
                Err(err) => {
                    if !is_task {
                        ctx.record_error(&step_id, &err.to_string());
                        this.hooks
                            .dispatch(&EngineEvent::StepFailed {
                                run_id: ctx.run_id,
                                step_id: step_id.clone(),
                                error: err.to_string(),
                            })
                            .await;
                    }
                    tracing::warn!(
                        run_id = %ctx.run_id,
                        step = step_id.as_str(),
                        error = %err,
                        "step failed"
                    );
                    return Err(err);
                }
            };

            ctx.record_result(&step_id, value.clone());
            this.hooks
                .dispatch(&EngineEvent::StepCompleted {
                    run_id: ctx.run_id,
                    step_id: step_id.clone(),
                    result: value.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                })
                .await;

            match step.next {
                NextStep::None => Ok(value),
                NextStep::Single(next) => this.run_step(def, ctx, next).await,
                NextStep::Fanout(ids) => {
                    let results = this.fanout(&def, &ctx, &ids).await?;
                    Ok(Value::Array(results))
                }
            }
        })
    }

    /// Launch one detached sub-traversal per id and await all of them,
    /// preserving declaration order. The first failure propagates; already
    /// launched siblings keep running.
    async fn fanout(
        &self,
        def: &Arc<WorkflowDefinition>,
        ctx: &Arc<RunContext>,
        ids: &[String],
    ) -> Result<Vec<Value>, EngineError> {
        let handles: Vec<JoinHandle<Result<Value, EngineError>>> = ids
            .iter()
            .map(|id| {
                tokio::spawn(self.run_step(Arc::clone(def), Arc::clone(ctx), id.clone()))
            })
            .collect();
        try_join_all(handles.into_iter().map(join_branch)).await
    }

    // -- step dispatch ----------------------------------------------------

    /// Invoke a registered unit of work with resolved input, retrying on a
    /// fixed delay up to the step's budget, then apply the output mapping.
    async fn run_task(
        &self,
        ctx: &Arc<RunContext>,
        step_id: &str,
        cfg: &TaskStep,
    ) -> Result<Value, EngineError> {
        if let Some(gate) = &cfg.gate {
            if !gate.eval(&ctx.view()) {
                tracing::debug!(
                    run_id = %ctx.run_id,
                    step = step_id,
                    "gate closed, skipping task"
                );
                return Ok(Value::Null);
            }
        }

        let unit = match self.tasks.get(&cfg.task) {
            Ok(unit) => unit,
            Err(err) => {
                ctx.record_error(step_id, &err.to_string());
                self.hooks
                    .dispatch(&EngineEvent::StepFailed {
                        run_id: ctx.run_id,
                        step_id: step_id.to_string(),
                        error: err.to_string(),
                    })
                    .await;
                return Err(err);
            }
        };

        let attempts = cfg.retries + 1;
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            // Re-resolved per attempt so retries observe context writes
            // made since the previous attempt.
            let input = resolve_input(ctx, cfg);
            match unit.execute_boxed(input, ctx).await {
                Ok(value) => break value,
                Err(err) => {
                    ctx.record_error(step_id, &err.to_string());
                    self.hooks
                        .dispatch(&EngineEvent::StepFailed {
                            run_id: ctx.run_id,
                            step_id: step_id.to_string(),
                            error: err.to_string(),
                        })
                        .await;
                    if attempt >= attempts {
                        return Err(err.for_step(step_id));
                    }
                    tracing::warn!(
                        run_id = %ctx.run_id,
                        step = step_id,
                        attempt,
                        error = %err,
                        "task attempt failed, retrying"
                    );
                    if let Some(delay) = cfg.retry_delay {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        };

        match &cfg.output {
            Some(mapping) => {
                for (result_key, target_path) in mapping {
                    let value = result.get(result_key).cloned().unwrap_or(Value::Null);
                    ctx.write_output(target_path, value);
                }
            }
            None => ctx.merge_output(&result),
        }
        Ok(result)
    }

    /// Launch every branch as a detached task, then settle on all of them
    /// or on the first, per `wait_for_all`.
    async fn run_parallel(
        &self,
        def: &Arc<WorkflowDefinition>,
        ctx: &Arc<RunContext>,
        cfg: &ParallelStep,
    ) -> Result<Value, EngineError> {
        if cfg.branches.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        if cfg.wait_for_all {
            let results = self.fanout(def, ctx, &cfg.branches).await?;
            return Ok(Value::Array(results));
        }
        // First settle wins, success or failure. Losing branches keep
        // running detached; dropping a JoinHandle does not abort its task.
        let handles: Vec<JoinHandle<Result<Value, EngineError>>> = cfg
            .branches
            .iter()
            .map(|id| {
                tokio::spawn(self.run_step(Arc::clone(def), Arc::clone(ctx), id.clone()))
            })
            .collect();
        let futures: Vec<StepFuture> = handles
            .into_iter()
            .map(|handle| Box::pin(join_branch(handle)) as StepFuture)
            .collect();
        let (first, _index, _rest) = select_all(futures).await;
        first
    }

    /// Evaluate the predicate against the context view and follow one of
    /// the two branches.
    async fn run_condition(
        &self,
        def: &Arc<WorkflowDefinition>,
        ctx: &Arc<RunContext>,
        cfg: &ConditionStep,
    ) -> Result<Value, EngineError> {
        let branch = if cfg.predicate.eval(&ctx.view()) {
            &cfg.on_true
        } else {
            &cfg.on_false
        };
        self.run_step(Arc::clone(def), Arc::clone(ctx), branch.clone())
            .await
    }

    /// Run the iterator step once per item in fixed-size batches. Each item
    /// executes against its own sub-context; results come back in item
    /// order. Any item failure fails the step.
    async fn run_map(
        &self,
        def: &Arc<WorkflowDefinition>,
        ctx: &Arc<RunContext>,
        cfg: &MapStep,
    ) -> Result<Value, EngineError> {
        let items = resolve_items(ctx, &cfg.items)?;
        let mut results = Vec::with_capacity(items.len());
        for batch in items.chunks(cfg.concurrency.max(1)) {
            let handles: Vec<JoinHandle<Result<Value, EngineError>>> = batch
                .iter()
                .map(|item| {
                    let sub = Arc::new(ctx.sub_context(item.clone()));
                    tokio::spawn(self.run_step(Arc::clone(def), sub, cfg.iterator.clone()))
                })
                .collect();
            for handle in handles {
                results.push(join_branch(handle).await?);
            }
        }
        Ok(Value::Array(results))
    }

    /// Re-execute the target step with exponential backoff until it
    /// succeeds, the budget is spent, or the veto predicate declines.
    async fn run_retry(
        &self,
        def: &Arc<WorkflowDefinition>,
        ctx: &Arc<RunContext>,
        cfg: &RetryStep,
    ) -> Result<Value, EngineError> {
        let mut attempt = 0u32;
        loop {
            match self
                .run_step(Arc::clone(def), Arc::clone(ctx), cfg.target.clone())
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= cfg.max_retries {
                        return Err(err);
                    }
                    let failures = attempt + 1;
                    if let Some(pred) = &cfg.should_retry {
                        if !pred.eval(&err.to_string(), failures) {
                            return Err(err);
                        }
                    }
                    // A non-positive or non-finite factor would panic in
                    // mul_f64; fall back to no delay.
                    let factor = cfg.backoff_factor.powi(attempt as i32);
                    let delay = if factor.is_finite() && factor > 0.0 {
                        cfg.base_delay.mul_f64(factor)
                    } else {
                        Duration::ZERO
                    };
                    tracing::debug!(
                        run_id = %ctx.run_id,
                        target = cfg.target.as_str(),
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("tasks", &self.tasks)
            .field("hooks", &self.hooks)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Resolution helpers
// ---------------------------------------------------------------------------

/// Await a spawned branch, converting a panic into an execution error.
async fn join_branch(handle: JoinHandle<Result<Value, EngineError>>) -> Result<Value, EngineError> {
    handle
        .await
        .map_err(|err| EngineError::Execution(format!("branch task panicked: {err}")))?
}

/// Build a Task step's effective input. No mapping passes the workflow
/// input through unchanged; otherwise each entry resolves independently
/// and missing references bind null.
fn resolve_input(ctx: &RunContext, cfg: &TaskStep) -> Value {
    let Some(mapping) = &cfg.input else {
        return ctx.input().clone();
    };
    let view = ctx.view();
    let mut input = Map::new();
    for (target, source) in mapping {
        let value = match source {
            InputSource::Field(reference) => {
                if reference.starts_with("steps.") {
                    lookup_path(&view, reference).cloned().unwrap_or(Value::Null)
                } else {
                    ctx.input().get(reference).cloned().unwrap_or(Value::Null)
                }
            }
            InputSource::Compute(f) => f.call(&view),
        };
        input.insert(target.clone(), value);
    }
    Value::Object(input)
}

/// Resolve a Map step's item source to an owned sequence.
fn resolve_items(ctx: &RunContext, source: &ItemSource) -> Result<Vec<Value>, EngineError> {
    let resolved = match source {
        ItemSource::Literal(items) => return Ok(items.clone()),
        ItemSource::Reference(reference) => {
            if reference.starts_with("steps.") {
                ctx.resolve_path(reference)
            } else {
                lookup_path(ctx.input(), reference)
                    .cloned()
                    .unwrap_or(Value::Null)
            }
        }
    };
    match resolved {
        Value::Array(items) => Ok(items),
        other => Err(EngineError::Validation(format!(
            "map items must be a sequence, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
