//! Engine logic for stepweave.
//!
//! Two engines live here, sharing a context store, registries, a hook
//! dispatcher, and an error taxonomy:
//!
//! - `workflow` -- the step graph interpreter: walks a `WorkflowDefinition`
//!   from its entry point, dispatching Task / Parallel / Condition / Map /
//!   Retry steps and merging results into the shared `RunContext`.
//! - `orchestrator` -- the decompose/dispatch/evaluate loop: splits a
//!   `TaskDefinition` into capability-matched subtasks, runs each against
//!   the first matching registered agent, aggregates, scores, and retries
//!   with feedback.
//!
//! Registries and the hook dispatcher are constructor-injected; there is no
//! ambient global state.

pub mod error;
pub mod hooks;
pub mod orchestrator;
pub mod registry;
pub mod workflow;

pub use error::EngineError;
pub use hooks::{HookDispatcher, LifecycleHook, hook_fn};
pub use orchestrator::{
    Agent, AgentRegistry, AgentRequest, ExecutionContext, Orchestrator, OrchestratorConfig,
    TaskRunResult, agent_fn,
};
pub use registry::{TaskRegistry, WorkUnit, work_fn};
pub use workflow::context::RunContext;
pub use workflow::interpreter::Interpreter;
