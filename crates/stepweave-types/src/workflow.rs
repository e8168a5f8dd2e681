//! Workflow domain types for stepweave.
//!
//! Defines the canonical representation of a workflow: a map of typed steps
//! (`Step`), the successor wiring between them (`NextStep`), and the
//! `WorkflowDefinition` that owns the graph. Definitions are built
//! programmatically through `WorkflowBuilder` and are immutable once built.
//!
//! Predicates and computed input sources are plain Rust closures evaluated
//! against a JSON view of the run context, wrapped in cloneable newtypes so
//! step configs stay `Clone + Debug`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default batch size for Map steps.
pub const DEFAULT_MAP_CONCURRENCY: usize = 5;

// ---------------------------------------------------------------------------
// Callable wrappers
// ---------------------------------------------------------------------------

/// A predicate over the run context, evaluated against a JSON view with the
/// shape `{ "input": .., "steps": { .. }, "output": .., "metadata": { .. } }`.
///
/// Used by Task gates and Condition branches.
#[derive(Clone)]
pub struct ContextPredicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>);

impl ContextPredicate {
    pub fn new(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Evaluate the predicate against a context view.
    pub fn eval(&self, view: &Value) -> bool {
        (self.0)(view)
    }
}

impl fmt::Debug for ContextPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextPredicate(..)")
    }
}

/// A computed input source: a function of the context view producing the
/// value bound to an input-mapping key.
#[derive(Clone)]
pub struct InputFn(Arc<dyn Fn(&Value) -> Value + Send + Sync>);

impl InputFn {
    pub fn new(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Compute the input value from a context view.
    pub fn call(&self, view: &Value) -> Value {
        (self.0)(view)
    }
}

impl fmt::Debug for InputFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InputFn(..)")
    }
}

/// A veto predicate for Retry steps: `(error message, attempts so far) ->
/// keep retrying?`. `attempts` is 1-based (the number of executions that
/// have already failed).
#[derive(Clone)]
pub struct RetryPredicate(Arc<dyn Fn(&str, u32) -> bool + Send + Sync>);

impl RetryPredicate {
    pub fn new(f: impl Fn(&str, u32) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Decide whether another attempt should be made.
    pub fn eval(&self, error: &str, attempts: u32) -> bool {
        (self.0)(error, attempts)
    }
}

impl fmt::Debug for RetryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryPredicate(..)")
    }
}

// ---------------------------------------------------------------------------
// Step wiring
// ---------------------------------------------------------------------------

/// Successor declaration for a step.
///
/// A `Fanout` successor launches one concurrent branch per id and the step
/// resolves to the ordered array of branch results.
#[derive(Debug, Clone, Default)]
pub enum NextStep {
    /// Terminal step: its result becomes the workflow's final output.
    #[default]
    None,
    /// Single successor, executed after this step.
    Single(String),
    /// Concurrent fan-out over several successors.
    Fanout(Vec<String>),
}

// ---------------------------------------------------------------------------
// Step configs
// ---------------------------------------------------------------------------

/// Where a Task step's input-mapping value comes from.
#[derive(Debug, Clone)]
pub enum InputSource {
    /// A string reference. A `steps.` prefix resolves as a dotted path into
    /// the run context; anything else is a key on the workflow's original
    /// input. Missing references resolve to null, never an error.
    Field(String),
    /// A function of the context view.
    Compute(InputFn),
}

impl InputSource {
    /// Convenience constructor for a string reference.
    pub fn field(s: impl Into<String>) -> Self {
        Self::Field(s.into())
    }

    /// Convenience constructor for a computed source.
    pub fn compute(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self::Compute(InputFn::new(f))
    }
}

/// Configuration for a Task step: a named unit of work plus its input and
/// output wiring.
#[derive(Debug, Clone)]
pub struct TaskStep {
    /// Name of the registered unit of work to invoke.
    pub task: String,
    /// Input mapping: target key -> source. `None` passes the workflow
    /// input through unmodified.
    pub input: Option<HashMap<String, InputSource>>,
    /// Output mapping: result key -> dotted target path in the accumulated
    /// output. `None` shallow-merges the entire result; an empty mapping
    /// writes nothing.
    pub output: Option<HashMap<String, String>>,
    /// Gating predicate. When present and false the task is skipped with a
    /// null step result; traversal still proceeds to `next`.
    pub gate: Option<ContextPredicate>,
    /// Fixed-delay retry budget (number of re-executions after the first).
    pub retries: u32,
    /// Delay between task-local retries.
    pub retry_delay: Option<Duration>,
}

impl TaskStep {
    /// A task step invoking `task` with no mappings, gate, or retries.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            input: None,
            output: None,
            gate: None,
            retries: 0,
            retry_delay: None,
        }
    }

    /// Bind one input-mapping entry.
    pub fn input(mut self, target: impl Into<String>, source: InputSource) -> Self {
        self.input
            .get_or_insert_with(HashMap::new)
            .insert(target.into(), source);
        self
    }

    /// Bind one output-mapping entry.
    pub fn output(mut self, result_key: impl Into<String>, target_path: impl Into<String>) -> Self {
        self.output
            .get_or_insert_with(HashMap::new)
            .insert(result_key.into(), target_path.into());
        self
    }

    /// Suppress output accumulation: the result is still stored under the
    /// step's id, but nothing is written to the accumulated output.
    pub fn no_output(mut self) -> Self {
        self.output = Some(HashMap::new());
        self
    }

    /// Gate the task on a predicate over the context view.
    pub fn gate(mut self, predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.gate = Some(ContextPredicate::new(predicate));
        self
    }

    /// Set the fixed-delay retry budget.
    pub fn retries(mut self, retries: u32, delay: Option<Duration>) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }
}

/// Configuration for a Parallel step.
#[derive(Debug, Clone)]
pub struct ParallelStep {
    /// Branch step ids, each launched as a concurrent sub-traversal.
    pub branches: Vec<String>,
    /// `true`: settle once every branch succeeds (ordered array result);
    /// any branch failure fails the step. `false`: settle with the first
    /// branch to complete, success or failure.
    pub wait_for_all: bool,
}

/// Configuration for a Condition step.
#[derive(Debug, Clone)]
pub struct ConditionStep {
    pub predicate: ContextPredicate,
    /// Step id followed when the predicate is true.
    pub on_true: String,
    /// Step id followed when the predicate is false.
    pub on_false: String,
}

/// Item source for a Map step.
#[derive(Debug, Clone)]
pub enum ItemSource {
    /// A literal ordered sequence.
    Literal(Vec<Value>),
    /// A reference: `steps.` prefix resolves as a dotted path into the run
    /// context, otherwise a dotted path into the workflow input.
    Reference(String),
}

/// Configuration for a Map step: item-wise execution of an iterator step in
/// fixed-size concurrent batches.
#[derive(Debug, Clone)]
pub struct MapStep {
    pub items: ItemSource,
    /// Step id executed once per item against a per-item sub-context.
    pub iterator: String,
    /// Batch size; batches run one after another.
    pub concurrency: usize,
}

/// Configuration for a Retry step: exponential-backoff retry of a referenced
/// step, distinct from a Task step's fixed-delay budget.
#[derive(Debug, Clone)]
pub struct RetryStep {
    /// Step id to (re-)execute.
    pub target: String,
    /// Maximum number of re-executions after the first attempt.
    pub max_retries: u32,
    /// Delay before retry `n` (0-indexed) is `base_delay * backoff_factor^n`.
    pub base_delay: Duration,
    pub backoff_factor: f64,
    /// Optional veto: `(error, attempts so far) -> keep retrying?`.
    pub should_retry: Option<RetryPredicate>,
}

/// Step payload, a closed sum dispatched by exhaustive match.
#[derive(Debug, Clone)]
pub enum StepConfig {
    Task(TaskStep),
    Parallel(ParallelStep),
    Condition(ConditionStep),
    Map(MapStep),
    Retry(RetryStep),
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One node in a workflow's execution graph.
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique id within the owning workflow.
    pub id: String,
    /// Type-specific configuration.
    pub config: StepConfig,
    /// Declared successor(s).
    pub next: NextStep,
}

impl Step {
    /// A Task step.
    pub fn task(id: impl Into<String>, config: TaskStep) -> Self {
        Self {
            id: id.into(),
            config: StepConfig::Task(config),
            next: NextStep::None,
        }
    }

    /// A Parallel step over the given branches.
    pub fn parallel(id: impl Into<String>, branches: Vec<String>, wait_for_all: bool) -> Self {
        Self {
            id: id.into(),
            config: StepConfig::Parallel(ParallelStep {
                branches,
                wait_for_all,
            }),
            next: NextStep::None,
        }
    }

    /// A Condition step.
    pub fn condition(
        id: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
        on_true: impl Into<String>,
        on_false: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            config: StepConfig::Condition(ConditionStep {
                predicate: ContextPredicate::new(predicate),
                on_true: on_true.into(),
                on_false: on_false.into(),
            }),
            next: NextStep::None,
        }
    }

    /// A Map step with the default batch size.
    pub fn map(id: impl Into<String>, items: ItemSource, iterator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: StepConfig::Map(MapStep {
                items,
                iterator: iterator.into(),
                concurrency: DEFAULT_MAP_CONCURRENCY,
            }),
            next: NextStep::None,
        }
    }

    /// A Retry step wrapping `target` with exponential backoff.
    pub fn retry(
        id: impl Into<String>,
        target: impl Into<String>,
        max_retries: u32,
        base_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            id: id.into(),
            config: StepConfig::Retry(RetryStep {
                target: target.into(),
                max_retries,
                base_delay,
                backoff_factor,
                should_retry: None,
            }),
            next: NextStep::None,
        }
    }

    /// Set a single successor.
    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = NextStep::Single(next.into());
        self
    }

    /// Set a concurrent fan-out of successors.
    pub fn then_all(mut self, next: Vec<String>) -> Self {
        self.next = NextStep::Fanout(next);
        self
    }

    /// Override the Map batch size. No effect on other step types.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        if let StepConfig::Map(ref mut map) = self.config {
            map.concurrency = concurrency;
        }
        self
    }

    /// Attach a veto predicate to a Retry step. No effect on other types.
    pub fn retry_when(
        mut self,
        predicate: impl Fn(&str, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        if let StepConfig::Retry(ref mut retry) = self.config {
            retry.should_retry = Some(RetryPredicate::new(predicate));
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow definition
// ---------------------------------------------------------------------------

/// The immutable definition of a workflow graph.
///
/// Step ids referenced as successors, branch targets, or Map iterators are
/// resolved at traversal time: a dangling reference is a NotFound failure
/// during execution, never a build error.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Steps keyed by id. Traversal order is graph order, not declaration
    /// order.
    pub steps: HashMap<String, Step>,
    /// Id of the step where traversal starts.
    pub entrypoint: String,
    pub input_schema: Option<String>,
    pub output_schema: Option<String>,
    pub tags: Vec<String>,
}

impl WorkflowDefinition {
    /// Start building a workflow definition.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(id, name)
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }
}

/// Errors from building a workflow definition.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowBuildError {
    /// The definition has no steps, so no entry point can be selected.
    #[error("workflow '{0}' has no steps")]
    Empty(String),

    /// Two steps were declared with the same id.
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),
}

/// Fluent builder for `WorkflowDefinition`.
///
/// The first-declared step becomes the entry point unless one is set
/// explicitly.
#[derive(Debug)]
pub struct WorkflowBuilder {
    id: String,
    name: String,
    description: Option<String>,
    steps: HashMap<String, Step>,
    first_step: Option<String>,
    entrypoint: Option<String>,
    input_schema: Option<String>,
    output_schema: Option<String>,
    tags: Vec<String>,
    duplicates: Vec<String>,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            steps: HashMap::new(),
            first_step: None,
            entrypoint: None,
            input_schema: None,
            output_schema: None,
            tags: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a step. Returns an error from `build` if the id is duplicated.
    pub fn step(mut self, step: Step) -> Self {
        if self.first_step.is_none() {
            self.first_step = Some(step.id.clone());
        }
        // Duplicates are detected at build time so the fluent chain stays
        // infallible.
        if self.steps.contains_key(&step.id) {
            self.duplicates.push(step.id.clone());
        }
        self.steps.insert(step.id.clone(), step);
        self
    }

    /// Explicitly select the entry-point step.
    pub fn entrypoint(mut self, step_id: impl Into<String>) -> Self {
        self.entrypoint = Some(step_id.into());
        self
    }

    pub fn input_schema(mut self, schema: impl Into<String>) -> Self {
        self.input_schema = Some(schema.into());
        self
    }

    pub fn output_schema(mut self, schema: impl Into<String>) -> Self {
        self.output_schema = Some(schema.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Finalize the definition.
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowBuildError> {
        if let Some(dup) = self.duplicates.into_iter().next() {
            return Err(WorkflowBuildError::DuplicateStep(dup));
        }
        let entrypoint = self
            .entrypoint
            .or(self.first_step)
            .ok_or_else(|| WorkflowBuildError::Empty(self.id.clone()))?;
        Ok(WorkflowDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            steps: self.steps,
            entrypoint,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            tags: self.tags,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
