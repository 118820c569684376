//! Engine core: definition graph, execution tree, scheduling, and joins.
//!
//! - `process` -- `ProcessSpec` ownership of node specs, edge wiring, validation
//! - `graph` -- compiled petgraph view for reachability queries
//! - `workflow` -- task arena, host-facing surface, cancellation
//! - `scheduler` -- the step loop that advances ready tasks
//! - `join` -- synchronization and data reconciliation for converging branches

pub mod graph;
pub mod join;
pub mod process;
pub mod scheduler;
pub mod workflow;
