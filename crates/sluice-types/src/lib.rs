//! Shared domain types for the Sluice workflow engine.
//!
//! This crate contains the definition-time types (node specs, form value
//! objects) and the runtime task state machine. Zero engine logic and zero
//! infrastructure dependencies, only serde.

pub mod process;
pub mod task;
