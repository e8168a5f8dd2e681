//! Unit-of-work registry.
//!
//! Units of work are named callables registered independently of any
//! workflow; Task steps reference them by name. The registry is
//! constructor-injected into the interpreter -- there is no ambient global
//! instance.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::EngineError;
use crate::workflow::context::RunContext;

// ---------------------------------------------------------------------------
// WorkUnit trait
// ---------------------------------------------------------------------------

/// A named, input/output-typed callable invoked by Task steps.
pub trait WorkUnit: Send + Sync {
    /// Execute with a resolved input and read access to the run context.
    fn execute(
        &self,
        input: Value,
        ctx: &RunContext,
    ) -> impl Future<Output = Result<Value, EngineError>> + Send;
}

/// Object-safe version of [`WorkUnit`] with boxed futures.
pub trait WorkUnitDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        input: Value,
        ctx: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send + 'a>>;
}

/// Blanket implementation: any `WorkUnit` is a `WorkUnitDyn`.
impl<T: WorkUnit> WorkUnitDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        input: Value,
        ctx: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send + 'a>> {
        Box::pin(self.execute(input, ctx))
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// A unit of work built from an async closure over the input value.
/// See [`work_fn`].
pub struct FnWorkUnit<F>(F);

impl<F, Fut> WorkUnit for FnWorkUnit<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EngineError>> + Send,
{
    fn execute(
        &self,
        input: Value,
        _ctx: &RunContext,
    ) -> impl Future<Output = Result<Value, EngineError>> + Send {
        (self.0)(input)
    }
}

/// Wrap an async closure as a unit of work that ignores the run context.
pub fn work_fn<F, Fut>(f: F) -> FnWorkUnit<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EngineError>> + Send,
{
    FnWorkUnit(f)
}

// ---------------------------------------------------------------------------
// TaskRegistry
// ---------------------------------------------------------------------------

/// Name -> unit-of-work lookup table.
#[derive(Default)]
pub struct TaskRegistry {
    units: DashMap<String, Arc<dyn WorkUnitDyn>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit of work under a name, replacing any previous entry.
    pub fn register<W: WorkUnit + 'static>(&self, name: impl Into<String>, unit: W) {
        self.units.insert(name.into(), Arc::new(unit));
    }

    /// Look up a unit of work, failing with `TaskNotFound` for unknown names.
    pub fn get(&self, name: &str) -> Result<Arc<dyn WorkUnitDyn>, EngineError> {
        self.units
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::TaskNotFound(name.to_string()))
    }

    /// Whether a unit of work is registered under this name.
    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("units", &self.units.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_unit_executes() {
        let registry = TaskRegistry::new();
        registry.register("double", work_fn(|input: Value| async move {
            let n = input["n"].as_i64().unwrap_or(0);
            Ok(json!({ "n": n * 2 }))
        }));

        let ctx = RunContext::new(Value::Null);
        let unit = registry.get("double").unwrap();
        let result = unit.execute_boxed(json!({ "n": 4 }), &ctx).await.unwrap();
        assert_eq!(result, json!({ "n": 8 }));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = TaskRegistry::new();
        let Err(err) = registry.get("missing") else {
            panic!("expected lookup to fail");
        };
        assert!(matches!(err, EngineError::TaskNotFound(name) if name == "missing"));
    }

    #[test]
    fn re_registration_replaces() {
        let registry = TaskRegistry::new();
        registry.register("unit", work_fn(|_| async { Ok(json!(1)) }));
        registry.register("unit", work_fn(|_| async { Ok(json!(2)) }));
        assert!(registry.contains("unit"));
        assert!(!registry.contains("other"));
    }
}
