//! Task analysis, decomposition, and input normalization.

use serde_json::{Map, Value, json};

use stepweave_types::task::{Complexity, Strategy, TaskAnalysis, TaskDefinition};

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Estimates a task's complexity and picks a decomposition strategy.
///
/// Pluggable so richer analyzers (model-backed or rule-based) can slot in
/// without touching the engine loop.
pub trait TaskAnalyzer: Send + Sync {
    fn analyze(&self, task: &TaskDefinition) -> TaskAnalysis;
}

/// Fixed-heuristic analyzer: every task is moderate complexity with the
/// auto strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAnalyzer;

impl TaskAnalyzer for HeuristicAnalyzer {
    fn analyze(&self, _task: &TaskDefinition) -> TaskAnalysis {
        TaskAnalysis {
            complexity: Complexity::Moderate,
            strategy: Strategy::Auto,
        }
    }
}

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

/// Split a task into subtasks per the chosen strategy.
///
/// Atomic, or auto with at most one required capability, yields the task
/// itself as its only subtask. Auto with several capabilities yields one
/// subtask per capability, each inheriting the parent's goal, input, and
/// expected output and requiring only that capability.
pub fn decompose(task: &TaskDefinition, analysis: TaskAnalysis) -> Vec<TaskDefinition> {
    let atomic = matches!(analysis.strategy, Strategy::Atomic) || task.capabilities.len() <= 1;
    if atomic {
        return vec![task.clone()];
    }
    task.capabilities
        .iter()
        .map(|capability| TaskDefinition {
            name: format!("{}:{capability}", task.name),
            description: task.description.clone(),
            goal: task.goal.clone(),
            input: task.input.clone(),
            expected_output: task.expected_output.clone(),
            capabilities: vec![capability.clone()],
            criteria: Default::default(),
            max_attempts: 1,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Input normalization
// ---------------------------------------------------------------------------

/// Normalize accumulated input for an executor via capability-driven field
/// aliases. Rules only fill absent fields, never overwrite present ones:
///
/// - `research`: absent `query` is filled from `topic`, else the goal
/// - `write`:    absent `prompt` is filled from the goal
pub fn normalize_input(capabilities: &[String], goal: &str, input: &Value) -> Value {
    let mut body = match input.as_object() {
        Some(map) => map.clone(),
        None => {
            let mut map = Map::new();
            if !input.is_null() {
                map.insert("input".to_string(), input.clone());
            }
            map
        }
    };

    for capability in capabilities {
        match capability.as_str() {
            "research" => {
                if !body.contains_key("query") {
                    let query = body
                        .get("topic")
                        .cloned()
                        .unwrap_or_else(|| json!(goal));
                    body.insert("query".to_string(), query);
                }
            }
            "write" => {
                if !body.contains_key("prompt") {
                    body.insert("prompt".to_string(), json!(goal));
                }
            }
            _ => {}
        }
    }

    Value::Object(body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analysis(strategy: Strategy) -> TaskAnalysis {
        TaskAnalysis {
            complexity: Complexity::Moderate,
            strategy,
        }
    }

    // -----------------------------------------------------------------------
    // Decomposition
    // -----------------------------------------------------------------------

    #[test]
    fn auto_with_three_capabilities_yields_one_subtask_each() {
        let task = TaskDefinition::new("digest", "Summarize today's AI news")
            .require("research")
            .require("summarize")
            .require("write");

        let subtasks = decompose(&task, analysis(Strategy::Auto));
        assert_eq!(subtasks.len(), 3);
        for (subtask, capability) in subtasks.iter().zip(["research", "summarize", "write"]) {
            assert_eq!(subtask.goal, task.goal);
            assert_eq!(subtask.capabilities, vec![capability.to_string()]);
        }
    }

    #[test]
    fn auto_with_one_capability_is_atomic() {
        let task = TaskDefinition::new("lookup", "find a fact").require("research");
        let subtasks = decompose(&task, analysis(Strategy::Auto));
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].name, "lookup");
    }

    #[test]
    fn atomic_strategy_ignores_capability_count() {
        let task = TaskDefinition::new("digest", "goal")
            .require("research")
            .require("write");
        let subtasks = decompose(&task, analysis(Strategy::Atomic));
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].capabilities.len(), 2);
    }

    #[test]
    fn heuristic_analyzer_is_constant() {
        let analyzer = HeuristicAnalyzer;
        let result = analyzer.analyze(&TaskDefinition::new("t", "g"));
        assert_eq!(result.complexity, Complexity::Moderate);
        assert_eq!(result.strategy, Strategy::Auto);
    }

    // -----------------------------------------------------------------------
    // Normalization
    // -----------------------------------------------------------------------

    #[test]
    fn research_alias_fills_query_from_topic() {
        let caps = vec!["research".to_string()];
        let body = normalize_input(&caps, "the goal", &json!({ "topic": "rust" }));
        assert_eq!(body["query"], json!("rust"));
        assert_eq!(body["topic"], json!("rust"));
    }

    #[test]
    fn research_alias_falls_back_to_goal() {
        let caps = vec!["research".to_string()];
        let body = normalize_input(&caps, "find the answer", &json!({}));
        assert_eq!(body["query"], json!("find the answer"));
    }

    #[test]
    fn aliases_never_overwrite_present_fields() {
        let caps = vec!["research".to_string(), "write".to_string()];
        let body = normalize_input(
            &caps,
            "goal",
            &json!({ "query": "explicit", "prompt": "kept" }),
        );
        assert_eq!(body["query"], json!("explicit"));
        assert_eq!(body["prompt"], json!("kept"));
    }

    #[test]
    fn non_object_input_is_wrapped() {
        let body = normalize_input(&[], "goal", &json!("bare"));
        assert_eq!(body, json!({ "input": "bare" }));

        let body = normalize_input(&[], "goal", &Value::Null);
        assert_eq!(body, json!({}));
    }
}
