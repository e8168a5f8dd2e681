//! Capability-tagged executors and their registry.
//!
//! Agents declare a capability set and execute subtask requests. The
//! orchestrator selects the first registered agent whose capabilities are a
//! superset of a subtask's requirements; registration order is the only
//! tiebreak, there is no scoring among multiple matches.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One subtask dispatch handed to an agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Name of the subtask being dispatched.
    pub task: String,
    /// The goal inherited from the parent task.
    pub goal: String,
    /// Normalized accumulated input.
    pub body: Value,
    /// Capability tags the subtask was matched on.
    pub tools: Vec<String>,
}

// ---------------------------------------------------------------------------
// Agent trait
// ---------------------------------------------------------------------------

/// A capability-tagged executor selected by the orchestrator.
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Capability tags this agent covers.
    fn capabilities(&self) -> &[String];

    /// Execute one subtask request, resolving with its result.
    fn execute(
        &self,
        request: AgentRequest,
    ) -> impl Future<Output = Result<Value, EngineError>> + Send;
}

/// Object-safe version of [`Agent`] with boxed futures.
pub trait AgentDyn: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> &[String];
    fn execute_boxed(
        &self,
        request: AgentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send + '_>>;
}

/// Blanket implementation: any `Agent` is an `AgentDyn`.
impl<T: Agent> AgentDyn for T {
    fn name(&self) -> &str {
        Agent::name(self)
    }

    fn capabilities(&self) -> &[String] {
        Agent::capabilities(self)
    }

    fn execute_boxed(
        &self,
        request: AgentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// An agent built from an async closure. See [`agent_fn`].
pub struct FnAgent<F> {
    name: String,
    capabilities: Vec<String>,
    f: F,
}

impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(AgentRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EngineError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn execute(
        &self,
        request: AgentRequest,
    ) -> impl Future<Output = Result<Value, EngineError>> + Send {
        (self.f)(request)
    }
}

/// Wrap an async closure as a named, capability-tagged agent.
pub fn agent_fn<F, Fut>(
    name: impl Into<String>,
    capabilities: impl IntoIterator<Item = impl Into<String>>,
    f: F,
) -> FnAgent<F>
where
    F: Fn(AgentRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EngineError>> + Send,
{
    FnAgent {
        name: name.into(),
        capabilities: capabilities.into_iter().map(Into::into).collect(),
        f,
    }
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

/// Ordered agent registry. Lookup walks registration order and returns the
/// first capability superset.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<dyn AgentDyn>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Order of registration is the dispatch priority.
    pub fn register<A: Agent + 'static>(&self, agent: A) {
        self.agents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(agent));
    }

    /// First registered agent whose capability set covers `required`.
    pub fn find(&self, required: &[String]) -> Result<Arc<dyn AgentDyn>, EngineError> {
        let agents = self
            .agents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        agents
            .iter()
            .find(|agent| {
                required
                    .iter()
                    .all(|capability| agent.capabilities().contains(capability))
            })
            .map(Arc::clone)
            .ok_or_else(|| EngineError::NoMatchingAgent(required.to_vec()))
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
