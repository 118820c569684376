//! The step loop that advances ready tasks.
//!
//! One pass (`step`) collects every `Ready` task in deterministic order
//! (depth-first from the root, children in creation order), executes each
//! node's behavior synchronously to completion, and spawns successor tasks.
//! `run_all` repeats passes until nothing is ready, which is how parallel
//! branches interleave without any actual concurrency.
//!
//! Suspension happens exactly at human-facing nodes: a `UserTask` child
//! settles into `Waiting` and the engine returns control to the host, which
//! later resumes it through `Workflow::complete_task`.

use sluice_types::process::NodeKind;
use sluice_types::task::TaskState;

use super::join;
use super::workflow::{EngineError, Workflow};

impl Workflow {
    /// Advance exactly one pass: execute every task that was `Ready` when
    /// the pass began. Returns the number of tasks completed.
    ///
    /// Tasks that become ready during the pass (spawned children, joins
    /// firing) run in the next pass, which keeps host-driven pacing around
    /// human tasks predictable.
    pub fn step(&mut self) -> Result<usize, EngineError> {
        let batch = self.ready_order();
        let mut completed = 0;
        for idx in batch {
            // A join may have been completed by an earlier task in this
            // batch; re-check before executing.
            if self.tasks[idx].state != TaskState::Ready {
                continue;
            }
            self.execute_task(idx)?;
            completed += 1;
        }
        Ok(completed)
    }

    /// Advance until no task is `Ready`. Returns total tasks completed.
    ///
    /// For an acyclic definition this terminates after at most one pass per
    /// tree depth; an explicit cycle in the definition loops by design.
    pub fn run_all(&mut self) -> Result<usize, EngineError> {
        let mut total = 0;
        loop {
            let completed = self.step()?;
            if completed == 0 {
                break;
            }
            total += completed;
        }
        if self.is_completed() {
            tracing::info!(workflow = %self.id, tasks = self.tasks(None).len(), "workflow completed");
        }
        Ok(total)
    }

    // -----------------------------------------------------------------------
    // Behavior execution
    // -----------------------------------------------------------------------

    /// Run one ready task: behavior, completion, successor spawning.
    ///
    /// A behavior failure marks this task `Error` and propagates with the
    /// task's identity; the rest of the tree is untouched and the workflow
    /// stays inspectable.
    fn execute_task(&mut self, idx: usize) -> Result<(), EngineError> {
        let kind = self.spec.resolve(&self.tasks[idx].node)?.kind.clone();

        if let Err(reason) = self.on_complete(idx, &kind) {
            let (id, node) = {
                let task = &self.tasks[idx];
                (task.id, task.node.clone())
            };
            self.transition(idx, TaskState::Error)?;
            tracing::warn!(
                workflow = %self.id,
                task = %id,
                node = node.as_str(),
                reason = reason.as_str(),
                "task behavior failed"
            );
            return Err(EngineError::TaskExecution {
                task: id,
                node,
                reason,
            });
        }

        self.transition(idx, TaskState::Completed)?;
        self.spawn_successors(idx)
    }

    /// The on-complete capability of the node's behavior variant.
    ///
    /// `Merge` delegates to the join coordinator's reconciliation; plain
    /// `Join` synchronizes control flow only and touches no data.
    fn on_complete(&mut self, idx: usize, kind: &NodeKind) -> Result<(), String> {
        match kind {
            NodeKind::Simple | NodeKind::Join => Ok(()),
            NodeKind::Merge => {
                join::reconcile(self, idx);
                Ok(())
            }
            NodeKind::UserTask { form } => {
                let data = &self.tasks[idx].data;
                for field in &form.fields {
                    if field.is_required() && !data.contains_key(&field.id) {
                        return Err(format!(
                            "required form field '{}' has no value",
                            field.id
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Spawn a task along each outgoing edge of a completed task's node.
    ///
    /// Converging edges route through the join coordinator instead of
    /// spawning unconditionally; everything else spawns a fresh child that
    /// inherits this branch's data.
    fn spawn_successors(&mut self, idx: usize) -> Result<(), EngineError> {
        let outgoing = self.spec.resolve(&self.tasks[idx].node)?.outgoing.clone();
        for succ in outgoing {
            if self.spec.resolve(&succ)?.is_join_family() {
                join::arrive(self, idx, &succ)?;
            } else {
                let child = self.spawn(&succ, Some(idx));
                self.evaluate_readiness(child)?;
            }
        }
        Ok(())
    }

    /// The evaluate-readiness capability: move a freshly spawned `Future`
    /// task to `Waiting` or `Ready`.
    pub(crate) fn evaluate_readiness(&mut self, idx: usize) -> Result<(), EngineError> {
        let kind = self.spec.resolve(&self.tasks[idx].node)?.kind.clone();
        match kind {
            NodeKind::UserTask { form } => {
                // Preload field defaults so the host sees them while the
                // task is held; supplied data overwrites them on resume.
                for field in &form.fields {
                    if let Some(default) = &field.default_value {
                        self.tasks[idx]
                            .data
                            .entry(field.id.clone())
                            .or_insert_with(|| serde_json::Value::String(default.clone()));
                    }
                }
                self.transition(idx, TaskState::Waiting)
            }
            NodeKind::Join | NodeKind::Merge => self.transition(idx, TaskState::Waiting),
            NodeKind::Simple => self.transition(idx, TaskState::Ready),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
