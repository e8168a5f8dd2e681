//! Goal-driven task orchestration.
//!
//! - `agents`   -- capability-tagged executors and their registry
//! - `context`  -- per-run execution record with an append-only log
//! - `planner`  -- task analysis and capability-based decomposition
//! - `evaluate` -- criterion scoring of aggregated results
//! - `engine`   -- the decompose/dispatch/evaluate/retry loop

pub mod agents;
pub mod context;
pub mod engine;
pub mod evaluate;
pub mod planner;

pub use agents::{Agent, AgentRegistry, AgentRequest, agent_fn};
pub use context::ExecutionContext;
pub use engine::{Orchestrator, OrchestratorConfig, TaskRunResult};
pub use evaluate::{CompletenessEvaluator, Evaluation, Evaluator};
pub use planner::{HeuristicAnalyzer, TaskAnalyzer};
