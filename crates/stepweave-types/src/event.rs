//! Lifecycle events emitted to registered hooks.
//!
//! Both engines funnel their extension points through one event type:
//! workflow start/end/error, step start/end/error, and orchestrator task
//! start/end/error. Events are serde-serializable so hook implementations
//! can forward them to logs, buses, or sinks unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A lifecycle event delivered to hooks in registration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A workflow run began traversal at its entry point.
    WorkflowStarted {
        run_id: Uuid,
        workflow_id: String,
        workflow_name: String,
    },
    /// A workflow run produced its final output.
    WorkflowCompleted {
        run_id: Uuid,
        workflow_id: String,
        output: Value,
        duration_ms: u64,
    },
    /// A workflow run aborted with an error.
    WorkflowFailed {
        run_id: Uuid,
        workflow_id: String,
        error: String,
    },
    /// A step began executing (fires once per attempt chain, before
    /// dispatch).
    StepStarted { run_id: Uuid, step_id: String },
    /// A step produced a result.
    StepCompleted {
        run_id: Uuid,
        step_id: String,
        result: Value,
        duration_ms: u64,
    },
    /// A step attempt failed (fires once per failed attempt).
    StepFailed {
        run_id: Uuid,
        step_id: String,
        error: String,
    },
    /// An orchestrator task run started.
    TaskStarted {
        run_id: Uuid,
        task: String,
        attempt: u32,
    },
    /// An orchestrator task run produced a result.
    TaskCompleted {
        run_id: Uuid,
        task: String,
        result: Value,
    },
    /// An orchestrator task run failed with an error.
    TaskFailed {
        run_id: Uuid,
        task: String,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serde_tagging() {
        let event = EngineEvent::StepCompleted {
            run_id: Uuid::now_v7(),
            step_id: "fetch".to_string(),
            result: json!({ "value": 7 }),
            duration_ms: 12,
        };
        let serialized = serde_json::to_string(&event).unwrap();
        assert!(serialized.contains("\"type\":\"step_completed\""));
        let parsed: EngineEvent = serde_json::from_str(&serialized).unwrap();
        assert!(matches!(parsed, EngineEvent::StepCompleted { step_id, .. } if step_id == "fetch"));
    }

    #[test]
    fn task_events_carry_attempt() {
        let event = EngineEvent::TaskStarted {
            run_id: Uuid::now_v7(),
            task: "digest".to_string(),
            attempt: 1,
        };
        let serialized = serde_json::to_string(&event).unwrap();
        assert!(serialized.contains("\"attempt\":1"));
    }
}
