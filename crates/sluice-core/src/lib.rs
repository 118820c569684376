//! Sluice workflow execution engine.
//!
//! An in-process engine that walks a process-definition graph with a
//! dynamically growing task tree: deterministic single-threaded scheduling,
//! branch synchronization with data reconciliation at joins, recursive
//! cancellation, and a converter registry that round-trips engine state
//! through portable JSON mappings.
//!
//! The engine decides nothing about transport or storage. Hosts drive it
//! through `Workflow` and persist it through `serializer::encode_workflow`
//! and `serializer::decode_workflow`.

pub mod engine;
pub mod serializer;

pub use engine::process::{ProcessError, ProcessSpec};
pub use engine::workflow::{EngineError, Task, Workflow};
