//! Runtime task states.
//!
//! A task walks a fixed state machine and never moves backward:
//!
//! ```text
//! Future -> Waiting -> Ready -> Completed
//!              |          \--> Error
//!              \---------------Cancelled (also from Ready)
//! ```
//!
//! `Completed`, `Cancelled`, and `Error` are terminal. The engine keeps
//! terminal tasks in the tree as an audit trail; pruning is the persistence
//! layer's business, never the engine's.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// Lifecycle state of a runtime task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, predecessor-dependent condition not yet evaluated.
    Future,
    /// Condition evaluated false: a join short of threshold, or a human
    /// task awaiting external input.
    Waiting,
    /// Eligible for the next scheduler pass.
    Ready,
    /// Terminal: executed successfully.
    Completed,
    /// Terminal: pruned by upstream cancellation or by the host.
    Cancelled,
    /// Terminal: the node's behavior raised during execution.
    Error,
}

impl TaskState {
    /// True for states the scheduler still has work to do on.
    pub fn is_pending(self) -> bool {
        matches!(self, TaskState::Future | TaskState::Waiting | TaskState::Ready)
    }

    /// True for states a task can never leave.
    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }

    /// Whether the state machine permits moving from `self` to `to`.
    ///
    /// Forward-only: every legal move strictly advances. Self-transitions
    /// are rejected along with everything backward.
    pub fn can_transition(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Future, Waiting)
                | (Future, Ready)
                | (Future, Cancelled)
                | (Waiting, Ready)
                | (Waiting, Cancelled)
                | (Ready, Completed)
                | (Ready, Cancelled)
                | (Ready, Error)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Future => "future",
            TaskState::Waiting => "waiting",
            TaskState::Ready => "ready",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::Error => "error",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
