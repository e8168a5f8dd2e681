//! Step graph interpreter core.
//!
//! - `context` -- the shared mutable run context: input, per-step results,
//!   accumulated output, errors, metadata, and dotted-path plumbing
//! - `interpreter` -- graph traversal and type-specific step dispatch

pub mod context;
pub mod interpreter;

pub use context::RunContext;
pub use interpreter::Interpreter;
