//! Lifecycle hook dispatcher.
//!
//! Hooks are side-effect-only extension points fired at workflow, step, and
//! task boundaries. The dispatcher awaits each hook in strict registration
//! order before continuing, so hooks can safely sequence external effects.
//!
//! `LifecycleHook` uses RPITIT for its async method; `LifecycleHookDyn`
//! provides the object-safe boxed-future mirror with a blanket impl,
//! following the same wrapper pattern used for units of work and agents.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stepweave_types::event::EngineEvent;

// ---------------------------------------------------------------------------
// LifecycleHook trait
// ---------------------------------------------------------------------------

/// An extension point invoked on engine lifecycle events.
pub trait LifecycleHook: Send + Sync {
    /// Handle one event. Hooks are awaited; keep them short.
    fn handle(&self, event: &EngineEvent) -> impl Future<Output = ()> + Send;
}

/// Object-safe version of [`LifecycleHook`] with boxed futures.
pub trait LifecycleHookDyn: Send + Sync {
    fn handle_boxed<'a>(
        &'a self,
        event: &'a EngineEvent,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Blanket implementation: any `LifecycleHook` is a `LifecycleHookDyn`.
impl<T: LifecycleHook> LifecycleHookDyn for T {
    fn handle_boxed<'a>(
        &'a self,
        event: &'a EngineEvent,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.handle(event))
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// A hook built from an async closure. See [`hook_fn`].
pub struct FnHook<F>(F);

impl<F, Fut> LifecycleHook for FnHook<F>
where
    F: Fn(EngineEvent) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    fn handle(&self, event: &EngineEvent) -> impl Future<Output = ()> + Send {
        (self.0)(event.clone())
    }
}

/// Wrap an async closure as a lifecycle hook.
pub fn hook_fn<F, Fut>(f: F) -> FnHook<F>
where
    F: Fn(EngineEvent) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnHook(f)
}

// ---------------------------------------------------------------------------
// HookDispatcher
// ---------------------------------------------------------------------------

/// Ordered collection of lifecycle hooks.
///
/// Constructor-injected into both engines; cloning shares the registered
/// hooks.
#[derive(Default, Clone)]
pub struct HookDispatcher {
    hooks: Vec<Arc<dyn LifecycleHookDyn>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Hooks fire in registration order.
    pub fn register<H: LifecycleHook + 'static>(&mut self, hook: H) {
        self.hooks.push(Arc::new(hook));
    }

    /// Dispatch an event to every hook, awaiting each in order.
    pub async fn dispatch(&self, event: &EngineEvent) {
        for hook in &self.hooks {
            hook.handle_boxed(event).await;
        }
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
