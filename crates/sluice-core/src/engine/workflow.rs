//! Runtime task arena and the host-facing workflow surface.
//!
//! A `Workflow` is one running instance of a `ProcessSpec`. Tasks live in an
//! arena indexed by position; parent/children/contributor relations are
//! index relations, never owning references, so the tree tolerates the
//! cross-references a join introduces. Externally tasks are addressed by
//! their generated UUID.
//!
//! The model is single-threaded and cooperative: the host drives the
//! engine, one call at a time, and every operation resolves fully before
//! returning. Completed, cancelled, and errored tasks stay in the arena as
//! an audit trail.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sluice_types::process::NodeKind;
use sluice_types::task::TaskState;
use thiserror::Error;
use uuid::Uuid;

use super::graph::SpecGraph;
use super::join;
use super::process::{ProcessError, ProcessSpec};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised by the running engine.
///
/// Every error is local to one task's evaluation: sibling branches and
/// their data stores are never touched by a failing operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Definition-graph error surfaced at workflow creation.
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// A task lookup by id failed.
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// `complete_task` was called on a task that is not a held user task.
    #[error("task {task} ('{node}') is not awaiting external input")]
    TaskNotWaiting { task: Uuid, node: String },

    /// A state change would move a task backward in its state machine.
    #[error("illegal transition {from} -> {to} on task {task}")]
    InvalidTransition {
        task: Uuid,
        from: TaskState,
        to: TaskState,
    },

    /// A node's behavior raised while the scheduler executed it.
    #[error("task {task} ('{node}') failed: {reason}")]
    TaskExecution {
        task: Uuid,
        node: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One runtime instance of a node spec within a workflow.
///
/// A node spec reached via multiple branches or multiple loop rounds is
/// instantiated as that many distinct tasks.
#[derive(Debug, Clone)]
pub struct Task {
    /// Generated unique id (time-sortable).
    pub id: Uuid,
    /// Name of the node spec this task is bound to.
    pub node: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Per-branch data store. Keys are unique; last write wins.
    pub data: HashMap<String, Value>,
    /// Arena index of the parent task.
    pub(crate) parent: Option<usize>,
    /// Arena indices of child tasks, in creation order.
    pub(crate) children: Vec<usize>,
    /// Join bookkeeping: contributing tasks in arrival order.
    pub(crate) contributors: Vec<usize>,
    /// Join bookkeeping: arena index of the round's split task.
    pub(crate) round_split: Option<usize>,
    pub created_at: DateTime<Utc>,
    /// Set when the task enters a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Number of branches that have arrived at this join task.
    pub fn arrived_count(&self) -> usize {
        self.contributors.len()
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// One running instance of a process spec, owner of the whole task tree.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: Uuid,
    pub(crate) spec: ProcessSpec,
    pub(crate) graph: SpecGraph,
    pub(crate) tasks: Vec<Task>,
    index: HashMap<Uuid, usize>,
}

impl Workflow {
    /// Validate the spec and start a workflow with the root task ready.
    pub fn new(spec: ProcessSpec) -> Result<Self, EngineError> {
        spec.validate()?;
        let graph = SpecGraph::compile(&spec);
        let start = spec.start().to_string();

        let mut workflow = Self {
            id: Uuid::now_v7(),
            spec,
            graph,
            tasks: Vec::new(),
            index: HashMap::new(),
        };

        let root = workflow.spawn(&start, None);
        workflow.transition(root, TaskState::Ready)?;

        tracing::info!(
            workflow = %workflow.id,
            process = workflow.spec.name(),
            "workflow created"
        );
        Ok(workflow)
    }

    /// Rebuild a workflow from decoded parts (serializer path).
    pub(crate) fn from_parts(
        id: Uuid,
        spec: ProcessSpec,
        tasks: Vec<Task>,
    ) -> Result<Self, EngineError> {
        spec.validate()?;
        let graph = SpecGraph::compile(&spec);
        let index = tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        Ok(Self {
            id,
            spec,
            graph,
            tasks,
            index,
        })
    }

    /// The process definition this workflow executes.
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// All tasks in creation order, optionally filtered by state.
    pub fn tasks(&self, filter: Option<TaskState>) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| filter.is_none_or(|s| t.state == s))
            .collect()
    }

    /// Look up a task by id.
    pub fn task(&self, id: Uuid) -> Result<&Task, EngineError> {
        self.find_index(id).map(|i| &self.tasks[i])
    }

    /// Parent task id, if any.
    pub fn parent_of(&self, id: Uuid) -> Result<Option<Uuid>, EngineError> {
        let idx = self.find_index(id)?;
        Ok(self.tasks[idx].parent.map(|p| self.tasks[p].id))
    }

    /// Child task ids in creation order.
    pub fn children_of(&self, id: Uuid) -> Result<Vec<Uuid>, EngineError> {
        let idx = self.find_index(id)?;
        Ok(self.tasks[idx]
            .children
            .iter()
            .map(|&c| self.tasks[c].id)
            .collect())
    }

    /// Write one key into a task's data store (last write wins).
    pub fn set_task_data(
        &mut self,
        id: Uuid,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), EngineError> {
        let idx = self.find_index(id)?;
        self.tasks[idx].data.insert(key.into(), value);
        Ok(())
    }

    /// Resume a held human task with externally supplied data.
    ///
    /// The task must be a `UserTask` in `Waiting`. Supplied entries are
    /// merged into its data store (overwriting preloaded defaults) and the
    /// task becomes eligible for the next scheduler pass.
    pub fn complete_task(
        &mut self,
        id: Uuid,
        data: HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        let idx = self.find_index(id)?;
        let task = &self.tasks[idx];
        let node = self.spec.resolve(&task.node)?;
        let held = task.state == TaskState::Waiting
            && matches!(node.kind, NodeKind::UserTask { .. });
        if !held {
            return Err(EngineError::TaskNotWaiting {
                task: id,
                node: task.node.clone(),
            });
        }

        self.tasks[idx].data.extend(data);
        self.transition(idx, TaskState::Ready)?;
        tracing::debug!(workflow = %self.id, task = %id, "user task resumed");
        Ok(())
    }

    /// Cancel a task and, recursively, every descendant still pending.
    ///
    /// Synchronous and total: no pending descendant survives the call.
    /// Pending joins downstream are re-evaluated afterwards, since a
    /// cancelled branch no longer counts toward their thresholds.
    pub fn cancel_task(&mut self, id: Uuid) -> Result<(), EngineError> {
        let root = self.find_index(id)?;
        let mut cancelled = 0usize;
        for idx in self.subtree(root) {
            if self.tasks[idx].state.is_pending() {
                self.transition(idx, TaskState::Cancelled)?;
                cancelled += 1;
            }
        }
        tracing::debug!(
            workflow = %self.id,
            task = %id,
            cancelled,
            "cancellation sweep finished"
        );

        join::reevaluate_after_cancel(self)
    }

    /// True iff no task remains in a pending state.
    pub fn is_completed(&self) -> bool {
        !self.tasks.iter().any(|t| t.state.is_pending())
    }

    // -----------------------------------------------------------------------
    // Arena internals (shared with scheduler and join modules)
    // -----------------------------------------------------------------------

    pub(crate) fn find_index(&self, id: Uuid) -> Result<usize, EngineError> {
        self.index
            .get(&id)
            .copied()
            .ok_or(EngineError::TaskNotFound(id))
    }

    /// Create a task in `Future`, inheriting the parent's data store.
    pub(crate) fn spawn(&mut self, node: &str, parent: Option<usize>) -> usize {
        let idx = self.tasks.len();
        let data = parent
            .map(|p| self.tasks[p].data.clone())
            .unwrap_or_default();
        let task = Task {
            id: Uuid::now_v7(),
            node: node.to_string(),
            state: TaskState::Future,
            data,
            parent,
            children: Vec::new(),
            contributors: Vec::new(),
            round_split: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.index.insert(task.id, idx);
        if let Some(p) = parent {
            self.tasks[p].children.push(idx);
        }
        tracing::debug!(workflow = %self.id, task = %task.id, node, "task spawned");
        self.tasks.push(task);
        idx
    }

    /// Advance a task's state, rejecting anything backward.
    pub(crate) fn transition(&mut self, idx: usize, to: TaskState) -> Result<(), EngineError> {
        let task = &mut self.tasks[idx];
        if !task.state.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                task: task.id,
                from: task.state,
                to,
            });
        }
        let from = task.state;
        task.state = to;
        if to.is_terminal() {
            task.finished_at = Some(Utc::now());
        }
        tracing::debug!(
            workflow = %self.id,
            task = %task.id,
            node = task.node.as_str(),
            %from,
            %to,
            "task transition"
        );
        Ok(())
    }

    /// Arena indices of `idx` and all its descendants, preorder.
    pub(crate) fn subtree(&self, idx: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            order.push(current);
            for &child in self.tasks[current].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Ready tasks in deterministic order: depth-first from the root,
    /// children visited in creation order.
    pub(crate) fn ready_order(&self) -> Vec<usize> {
        if self.tasks.is_empty() {
            return Vec::new();
        }
        self.subtree(0)
            .into_iter()
            .filter(|&i| self.tasks[i].state == TaskState::Ready)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
