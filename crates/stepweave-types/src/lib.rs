//! Shared domain types for stepweave.
//!
//! This crate contains the data model for both engines: the workflow
//! definition with its typed step graph, and the orchestrator-level task
//! types (definitions, criteria, analysis, execution log records).
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod event;
pub mod task;
pub mod workflow;
