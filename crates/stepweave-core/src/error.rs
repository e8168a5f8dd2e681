//! Shared error taxonomy for both engines.
//!
//! Three families: NotFound (dangling step id, unregistered unit of work,
//! no capability match), Validation (malformed runtime data such as a
//! non-sequence Map item source), and Execution (the wrapped unit of work
//! or agent raised). Once local retry budgets are exhausted, errors
//! propagate up the call chain unchanged and abort the whole run.

/// Errors raised by the interpreter and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A successor, branch target, or Map iterator referenced a step id
    /// missing from the workflow definition.
    #[error("step '{0}' not found in workflow")]
    StepNotFound(String),

    /// A Task step referenced a unit of work that is not registered.
    #[error("task '{0}' is not registered")]
    TaskNotFound(String),

    /// No registered agent covers the required capability set.
    #[error("no registered agent matches capabilities {0:?}")]
    NoMatchingAgent(Vec<String>),

    /// Runtime data failed a structural check.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A step's unit of work failed after exhausting its retry budget.
    #[error("step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },

    /// A unit of work, agent, or internal task raised.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl EngineError {
    /// Wrap an execution failure with the owning step id, preserving an
    /// already-attributed failure unchanged.
    pub fn for_step(self, step_id: &str) -> Self {
        match self {
            EngineError::Execution(message) => EngineError::StepFailed {
                step_id: step_id.to_string(),
                message,
            },
            other => other,
        }
    }
}
