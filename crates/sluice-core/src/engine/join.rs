//! Synchronization of converging branches.
//!
//! A firing of a join (or merge) node is one "round", identified by the
//! join's node spec plus the nearest split task the converging branches
//! diverged from. Loops re-enter the same join node with a fresh split task
//! instance, so every round gets its own join task.
//!
//! The threshold is dynamic and counted per converging branch of the
//! split, not per distinct incoming edge name: two branches routed through
//! the same upstream node still owe two arrivals. A branch counts only
//! while it is live. Cancelled branches drop out of the threshold instead
//! of deadlocking the join; if every branch drops out the threshold
//! degrades to zero and the join fires with no contributors at all.

use sluice_types::task::TaskState;

use super::workflow::{EngineError, Workflow};

// ---------------------------------------------------------------------------
// Arrival
// ---------------------------------------------------------------------------

/// Record that `from_idx` completed with an outgoing edge into `join_name`.
///
/// Finds or creates the round's join task, appends the contributor in
/// arrival order, and fires the join once arrivals meet the threshold.
pub(crate) fn arrive(
    wf: &mut Workflow,
    from_idx: usize,
    join_name: &str,
) -> Result<(), EngineError> {
    let split_idx = find_split(wf, from_idx, join_name);

    let join_idx = match find_round(wf, join_name, split_idx) {
        Some(idx) => idx,
        None => {
            let idx = wf.spawn(join_name, Some(from_idx));
            // A join never inherits one branch's data implicitly; merges
            // reconcile explicitly on firing, plain joins stay empty.
            wf.tasks[idx].data.clear();
            wf.tasks[idx].round_split = Some(split_idx);
            wf.evaluate_readiness(idx)?;
            idx
        }
    };

    wf.tasks[join_idx].contributors.push(from_idx);
    tracing::debug!(
        workflow = %wf.id,
        join = join_name,
        arrivals = wf.tasks[join_idx].contributors.len(),
        "branch arrived at join"
    );

    fire_if_ready(wf, join_idx)
}

/// Nearest ancestor task (starting at the arriving task itself) whose node
/// diverges toward the join: two or more of its outgoing edges lead to it.
/// Falls back to the root task when the approach is linear.
fn find_split(wf: &Workflow, from_idx: usize, join_name: &str) -> usize {
    let mut current = Some(from_idx);
    while let Some(idx) = current {
        let node = &wf.tasks[idx].node;
        if wf.graph.branching_paths_to(&wf.spec, node, join_name) >= 2 {
            return idx;
        }
        current = wf.tasks[idx].parent;
    }
    0
}

/// The join task of this round, if any arrival already created it.
///
/// A pending task wins; otherwise a fired round with the same identity
/// absorbs the late arrival instead of letting it start a duplicate round.
/// One (join node, split task) pair fires at most once.
fn find_round(wf: &Workflow, join_name: &str, split_idx: usize) -> Option<usize> {
    wf.tasks
        .iter()
        .position(|t| {
            t.node == join_name && t.round_split == Some(split_idx) && t.state.is_pending()
        })
        .or_else(|| {
            wf.tasks
                .iter()
                .position(|t| t.node == join_name && t.round_split == Some(split_idx))
        })
}

/// Child of the split task on the ancestor path of `idx`, if any.
fn branch_of(wf: &Workflow, split_idx: usize, mut idx: usize) -> Option<usize> {
    while let Some(parent) = wf.tasks[idx].parent {
        if parent == split_idx {
            return Some(idx);
        }
        idx = parent;
    }
    None
}

// ---------------------------------------------------------------------------
// Threshold
// ---------------------------------------------------------------------------

/// Count threshold and arrivals for one round.
///
/// The unit of counting is a converging branch of the split task, not a
/// distinct incoming edge name: two branches routed through the same
/// upstream node owe two arrivals. A branch counts toward the threshold
/// iff a contributor arrived out of it or some pending task in it can
/// still reach the join. Edges straight from the split into the join count
/// one branch each, arrived by the split itself. The round's own join task
/// is excluded from the liveness scan so a cyclic definition cannot keep
/// its round alive forever.
fn round_counts(
    wf: &Workflow,
    split_idx: usize,
    join_name: &str,
    contributors: &[usize],
    exclude: Option<usize>,
) -> Result<(usize, usize), EngineError> {
    let split_node = wf.tasks[split_idx].node.clone();
    let outgoing = wf.spec.resolve(&split_node)?.outgoing.clone();

    let mut threshold = 0;
    let mut arrived = 0;

    let direct_edges = outgoing.iter().filter(|s| s.as_str() == join_name).count();
    if direct_edges > 0 {
        let direct_arrivals = contributors.iter().filter(|&&c| c == split_idx).count();
        threshold += direct_edges;
        arrived += direct_arrivals.min(direct_edges);
    }

    // Every other branch is rooted at a child task of the split. Round
    // tasks of this join never count as branches of their own round.
    let roots: Vec<usize> = wf.tasks[split_idx]
        .children
        .iter()
        .copied()
        .filter(|&c| Some(c) != exclude)
        .filter(|&c| {
            let node = wf.tasks[c].node.as_str();
            node != join_name && wf.graph.can_reach(node, join_name)
        })
        .collect();

    for root in roots {
        let arrived_here = contributors
            .iter()
            .any(|&c| c == root || branch_of(wf, split_idx, c) == Some(root));
        if arrived_here {
            threshold += 1;
            arrived += 1;
            continue;
        }
        let live = wf.subtree(root).into_iter().any(|i| {
            Some(i) != exclude
                && wf.tasks[i].state.is_pending()
                && wf.graph.can_reach(&wf.tasks[i].node, join_name)
        });
        if live {
            threshold += 1;
        }
    }
    Ok((threshold, arrived))
}

/// Fire the join (`Waiting -> Ready`) once arrivals meet the threshold.
fn fire_if_ready(wf: &mut Workflow, join_idx: usize) -> Result<(), EngineError> {
    if wf.tasks[join_idx].state != TaskState::Waiting {
        return Ok(());
    }
    let split_idx = wf.tasks[join_idx].round_split.unwrap_or(0);
    let join_name = wf.tasks[join_idx].node.clone();
    let contributors = wf.tasks[join_idx].contributors.clone();

    let (threshold, arrived) =
        round_counts(wf, split_idx, &join_name, &contributors, Some(join_idx))?;
    if arrived >= threshold {
        wf.transition(join_idx, TaskState::Ready)?;
        tracing::debug!(
            workflow = %wf.id,
            join = join_name.as_str(),
            threshold,
            arrived,
            "join fired"
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Merge reconciliation
// ---------------------------------------------------------------------------

/// Union all contributors' data into the merge task, in arrival order.
///
/// A later arrival overwrites an earlier one on shared keys; keys unique to
/// any one branch survive unconditionally. Contributor stores themselves
/// are never touched.
pub(crate) fn reconcile(wf: &mut Workflow, join_idx: usize) {
    let contributors = wf.tasks[join_idx].contributors.clone();
    for contributor in contributors {
        let data = wf.tasks[contributor].data.clone();
        wf.tasks[join_idx].data.extend(data);
    }
}

// ---------------------------------------------------------------------------
// Cancellation re-evaluation
// ---------------------------------------------------------------------------

/// Re-evaluate joins after a cancellation sweep.
///
/// Two effects: an existing round whose last live unarrived branch was
/// cancelled now meets its (lowered) threshold and fires; and a round that
/// lost *every* branch before any arrival fires immediately with an empty
/// contributor set, created under its split task.
pub(crate) fn reevaluate_after_cancel(wf: &mut Workflow) -> Result<(), EngineError> {
    // Existing rounds first.
    let pending_joins: Vec<usize> = wf
        .tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| {
            t.state == TaskState::Waiting
                && wf
                    .spec
                    .resolve(&t.node)
                    .is_ok_and(|n| n.is_join_family())
        })
        .map(|(i, _)| i)
        .collect();
    for idx in pending_joins {
        fire_if_ready(wf, idx)?;
    }

    // Rounds that never saw an arrival: a completed split whose every
    // branch toward the join was cancelled.
    let join_nodes: Vec<String> = wf
        .spec
        .nodes()
        .iter()
        .filter(|n| n.is_join_family())
        .map(|n| n.name.clone())
        .collect();

    for join_name in join_nodes {
        let candidates: Vec<usize> = wf
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == TaskState::Completed)
            .filter(|(_, t)| wf.graph.branching_paths_to(&wf.spec, &t.node, &join_name) >= 2)
            .map(|(i, _)| i)
            .collect();

        for &split_idx in &candidates {
            let subtree = wf.subtree(split_idx);
            // Only the innermost split owns the round.
            if candidates
                .iter()
                .any(|&other| other != split_idx && subtree.contains(&other))
            {
                continue;
            }
            // Round already tracked (pending or fired) by an arrival.
            if wf
                .tasks
                .iter()
                .any(|t| t.node == join_name && t.round_split == Some(split_idx))
            {
                continue;
            }
            // Something must actually have been pruned on the way there.
            let lost_branch = subtree.iter().any(|&i| {
                let task = &wf.tasks[i];
                task.state == TaskState::Cancelled && wf.graph.can_reach(&task.node, &join_name)
            });
            if !lost_branch {
                continue;
            }

            let (threshold, _) = round_counts(wf, split_idx, &join_name, &[], None)?;
            if threshold == 0 {
                let idx = wf.spawn(&join_name, Some(split_idx));
                wf.tasks[idx].data.clear();
                wf.tasks[idx].round_split = Some(split_idx);
                wf.evaluate_readiness(idx)?;
                wf.transition(idx, TaskState::Ready)?;
                tracing::debug!(
                    workflow = %wf.id,
                    join = join_name.as_str(),
                    "join fired with no contributors"
                );
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sluice_types::process::NodeSpec;
    use sluice_types::task::TaskState;

    use crate::engine::process::{ProcessSpec, START_NODE};
    use crate::engine::workflow::Workflow;

    fn connect_all(spec: &mut ProcessSpec, edges: &[(&str, &str)]) {
        for (from, to) in edges {
            spec.connect(from, to).unwrap();
        }
    }

    /// Start -> {a, b} -> <join_kind> -> end
    fn diamond(join: NodeSpec) -> ProcessSpec {
        let join_name = join.name.clone();
        let mut spec = ProcessSpec::new("diamond");
        spec.add_node(NodeSpec::simple("a")).unwrap();
        spec.add_node(NodeSpec::simple("b")).unwrap();
        spec.add_node(join).unwrap();
        spec.add_node(NodeSpec::simple("end")).unwrap();
        connect_all(
            &mut spec,
            &[
                (START_NODE, "a"),
                (START_NODE, "b"),
                ("a", join_name.as_str()),
                ("b", join_name.as_str()),
                (join_name.as_str(), "end"),
            ],
        );
        spec
    }

    /// Tag each currently ready branch task with `{node_name: 1}`.
    fn tag_ready_tasks(wf: &mut Workflow) {
        let tags: Vec<(uuid::Uuid, String)> = wf
            .tasks(Some(TaskState::Ready))
            .into_iter()
            .map(|t| (t.id, t.node.clone()))
            .collect();
        for (id, node) in tags {
            wf.set_task_data(id, node, json!(1)).unwrap();
        }
    }

    fn task_by_node<'a>(wf: &'a Workflow, node: &str) -> &'a crate::engine::workflow::Task {
        wf.tasks(None)
            .into_iter()
            .find(|t| t.node == node)
            .unwrap_or_else(|| panic!("no task for node '{node}'"))
    }

    // -----------------------------------------------------------------------
    // Merge reconciliation
    // -----------------------------------------------------------------------

    #[test]
    fn merge_unions_branch_data_later_arrival_wins() {
        // Branches first/second/third and bump -> fourth converge on two
        // merges at different depths; 'unmerged' hangs off 'second' without
        // routing into either merge.
        let mut spec = ProcessSpec::new("merging");
        for name in ["first", "second", "third", "bump", "fourth"] {
            spec.add_node(NodeSpec::simple(name)).unwrap();
        }
        spec.add_node(NodeSpec::merge("merge1")).unwrap();
        spec.add_node(NodeSpec::simple("simple1")).unwrap();
        spec.add_node(NodeSpec::merge("merge2")).unwrap();
        spec.add_node(NodeSpec::simple("simple2")).unwrap();
        spec.add_node(NodeSpec::simple("unmerged")).unwrap();
        connect_all(
            &mut spec,
            &[
                (START_NODE, "first"),
                (START_NODE, "second"),
                (START_NODE, "third"),
                (START_NODE, "bump"),
                ("bump", "fourth"),
                ("first", "merge1"),
                ("second", "merge1"),
                ("second", "unmerged"),
                ("first", "merge2"),
                ("second", "merge2"),
                ("third", "merge2"),
                ("fourth", "merge2"),
                ("merge1", "simple1"),
                ("merge2", "simple2"),
            ],
        );

        let mut wf = Workflow::new(spec).unwrap();
        wf.step().unwrap(); // Start completes, four branches ready
        tag_ready_tasks(&mut wf);
        wf.run_all().unwrap();
        assert!(wf.is_completed());

        // merge1 saw first and second.
        let simple1 = task_by_node(&wf, "simple1");
        assert_eq!(simple1.data["first"], json!(1));
        assert_eq!(simple1.data["second"], json!(1));
        assert!(!simple1.data.contains_key("third"));

        // merge2 saw all four branches; the fourth branch's lineage carries
        // the 'bump' key.
        let simple2 = task_by_node(&wf, "simple2");
        for key in ["first", "second", "third", "bump"] {
            assert_eq!(simple2.data[key], json!(1), "missing '{key}'");
        }

        // The sibling that never routed into a merge keeps only its own
        // lineage.
        let unmerged = task_by_node(&wf, "unmerged");
        assert_eq!(unmerged.data["second"], json!(1));
        for key in ["first", "third", "bump"] {
            assert!(!unmerged.data.contains_key(key), "leaked '{key}'");
        }
    }

    #[test]
    fn merge_collision_resolved_by_arrival_order() {
        let mut wf = Workflow::new(diamond(NodeSpec::merge("m"))).unwrap();
        wf.step().unwrap();

        // Both branches write the same key: 'a' arrives first (spawned
        // first), so 'b' must win.
        let ids: Vec<(uuid::Uuid, String)> = wf
            .tasks(Some(TaskState::Ready))
            .into_iter()
            .map(|t| (t.id, t.node.clone()))
            .collect();
        for (id, node) in ids {
            wf.set_task_data(id, "color", json!(node)).unwrap();
        }
        wf.run_all().unwrap();

        let merge = task_by_node(&wf, "m");
        assert_eq!(merge.state, TaskState::Completed);
        assert_eq!(merge.arrived_count(), 2);
        assert_eq!(merge.data["color"], json!("b"));
    }

    #[test]
    fn plain_join_injects_no_contributor_data() {
        let mut wf = Workflow::new(diamond(NodeSpec::join("j"))).unwrap();
        wf.step().unwrap();
        tag_ready_tasks(&mut wf);
        wf.run_all().unwrap();
        assert!(wf.is_completed());

        let join = task_by_node(&wf, "j");
        assert_eq!(join.state, TaskState::Completed);
        assert_eq!(join.arrived_count(), 2);
        assert!(join.data.is_empty());

        // Downstream of the join starts from a clean slate too.
        let end = task_by_node(&wf, "end");
        assert!(end.data.is_empty());
    }

    #[test]
    fn join_completes_exactly_once() {
        let mut wf = Workflow::new(diamond(NodeSpec::join("j"))).unwrap();
        wf.run_all().unwrap();

        let joins: Vec<_> = wf
            .tasks(None)
            .into_iter()
            .filter(|t| t.node == "j")
            .collect();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].state, TaskState::Completed);

        let ends: Vec<_> = wf
            .tasks(None)
            .into_iter()
            .filter(|t| t.node == "end")
            .collect();
        assert_eq!(ends.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Cancellation and thresholds
    // -----------------------------------------------------------------------

    #[test]
    fn cancelled_branch_lowers_threshold() {
        let mut wf = Workflow::new(diamond(NodeSpec::join("j"))).unwrap();
        wf.step().unwrap();

        let a = task_by_node(&wf, "a").id;
        wf.cancel_task(a).unwrap();
        wf.run_all().unwrap();

        assert!(wf.is_completed());
        let join = task_by_node(&wf, "j");
        assert_eq!(join.state, TaskState::Completed);
        assert_eq!(join.arrived_count(), 1);
        // The surviving branch reached the end.
        assert_eq!(task_by_node(&wf, "end").state, TaskState::Completed);
    }

    #[test]
    fn all_branches_cancelled_fires_join_empty() {
        let mut wf = Workflow::new(diamond(NodeSpec::join("j"))).unwrap();
        wf.step().unwrap();

        let a = task_by_node(&wf, "a").id;
        let b = task_by_node(&wf, "b").id;
        wf.cancel_task(a).unwrap();
        wf.cancel_task(b).unwrap();

        // The join fired immediately with no contributors.
        let join = task_by_node(&wf, "j");
        assert_eq!(join.state, TaskState::Ready);
        assert_eq!(join.arrived_count(), 0);

        wf.run_all().unwrap();
        assert!(wf.is_completed());
        assert_eq!(task_by_node(&wf, "j").state, TaskState::Completed);
        assert_eq!(task_by_node(&wf, "end").state, TaskState::Completed);
    }

    #[test]
    fn cancelling_one_of_many_keeps_join_waiting() {
        // Three branches; cancelling one must not fire the join while two
        // are still live.
        let mut spec = ProcessSpec::new("three");
        for name in ["a", "b", "c"] {
            spec.add_node(NodeSpec::simple(name)).unwrap();
        }
        spec.add_node(NodeSpec::join("j")).unwrap();
        connect_all(
            &mut spec,
            &[
                (START_NODE, "a"),
                (START_NODE, "b"),
                (START_NODE, "c"),
                ("a", "j"),
                ("b", "j"),
                ("c", "j"),
            ],
        );

        let mut wf = Workflow::new(spec).unwrap();
        wf.step().unwrap();
        let a = task_by_node(&wf, "a").id;
        wf.cancel_task(a).unwrap();

        wf.run_all().unwrap();
        assert!(wf.is_completed());
        let join = task_by_node(&wf, "j");
        assert_eq!(join.arrived_count(), 2);
    }

    // -----------------------------------------------------------------------
    // Rounds
    // -----------------------------------------------------------------------

    #[test]
    fn branches_through_shared_node_fire_round_once() {
        // Start -> {a, b}; a -> c, b -> d -> c; c -> j -> end. Both
        // branches route through node 'c', so the join sees two runtime
        // arrivals over one incoming edge, in different passes. One round,
        // one firing, one 'end' task.
        let mut spec = ProcessSpec::new("shared-edge");
        for name in ["a", "b", "c", "d", "end"] {
            spec.add_node(NodeSpec::simple(name)).unwrap();
        }
        spec.add_node(NodeSpec::join("j")).unwrap();
        connect_all(
            &mut spec,
            &[
                (START_NODE, "a"),
                (START_NODE, "b"),
                ("a", "c"),
                ("b", "d"),
                ("d", "c"),
                ("c", "j"),
                ("j", "end"),
            ],
        );

        let mut wf = Workflow::new(spec).unwrap();
        wf.run_all().unwrap();
        assert!(wf.is_completed());

        let joins: Vec<_> = wf
            .tasks(None)
            .into_iter()
            .filter(|t| t.node == "j")
            .collect();
        assert_eq!(joins.len(), 1, "one logical round, one join task");
        assert_eq!(joins[0].state, TaskState::Completed);
        assert_eq!(joins[0].arrived_count(), 2);

        let ends: Vec<_> = wf
            .tasks(None)
            .into_iter()
            .filter(|t| t.node == "end")
            .collect();
        assert_eq!(ends.len(), 1, "downstream ran exactly once");
    }

    #[test]
    fn join_holds_until_slower_branch_arrives() {
        // Start -> a -> j and Start -> b -> c -> j: after the fast
        // branch's arrival the join settles into Waiting.
        let mut spec = ProcessSpec::new("uneven");
        for name in ["a", "b", "c"] {
            spec.add_node(NodeSpec::simple(name)).unwrap();
        }
        spec.add_node(NodeSpec::join("j")).unwrap();
        connect_all(
            &mut spec,
            &[
                (START_NODE, "a"),
                (START_NODE, "b"),
                ("a", "j"),
                ("b", "c"),
                ("c", "j"),
            ],
        );

        let mut wf = Workflow::new(spec).unwrap();
        wf.step().unwrap(); // Start
        wf.step().unwrap(); // a arrives, b spawns c

        let join = task_by_node(&wf, "j");
        assert_eq!(join.state, TaskState::Waiting);
        assert_eq!(join.arrived_count(), 1);

        wf.run_all().unwrap();
        assert!(wf.is_completed());
        let join = task_by_node(&wf, "j");
        assert_eq!(join.state, TaskState::Completed);
        assert_eq!(join.arrived_count(), 2);
    }

    #[test]
    fn loop_rounds_create_distinct_join_tasks() {
        // entry -> {b, c} -> j -> entry ... each trip through the loop is a
        // separate round with its own join task.
        let mut spec = ProcessSpec::new("looped");
        for name in ["entry", "b", "c"] {
            spec.add_node(NodeSpec::simple(name)).unwrap();
        }
        spec.add_node(NodeSpec::join("j")).unwrap();
        connect_all(
            &mut spec,
            &[
                (START_NODE, "entry"),
                ("entry", "b"),
                ("entry", "c"),
                ("b", "j"),
                ("c", "j"),
                ("j", "entry"),
            ],
        );

        let mut wf = Workflow::new(spec).unwrap();
        // Enough passes for two full trips around the loop.
        for _ in 0..8 {
            wf.step().unwrap();
        }

        let completed_joins: Vec<_> = wf
            .tasks(None)
            .into_iter()
            .filter(|t| t.node == "j" && t.state == TaskState::Completed)
            .collect();
        assert!(
            completed_joins.len() >= 2,
            "expected at least two completed rounds, got {}",
            completed_joins.len()
        );
        assert!(completed_joins.iter().all(|t| t.arrived_count() == 2));
    }
}
