//! Compiled reachability view of a process definition.
//!
//! Uses `petgraph` to model the definition graph as a `DiGraph` so that
//! validation and the join coordinator can answer "can node A still reach
//! node B" without re-walking edge lists. Compiled once per finalized spec
//! and shared for the lifetime of a workflow.

use std::collections::HashMap;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};

use super::process::ProcessSpec;

// ---------------------------------------------------------------------------
// SpecGraph
// ---------------------------------------------------------------------------

/// A petgraph mirror of a process definition's nodes and edges.
#[derive(Debug, Clone)]
pub struct SpecGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl SpecGraph {
    /// Build the graph from a spec's nodes and their outgoing edge lists.
    pub fn compile(spec: &ProcessSpec) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in spec.nodes() {
            let idx = graph.add_node(node.name.clone());
            index.insert(node.name.clone(), idx);
        }
        for node in spec.nodes() {
            let from = index[&node.name];
            for succ in &node.outgoing {
                if let Some(&to) = index.get(succ.as_str()) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Self { graph, index }
    }

    /// Whether a path exists from `from` to `to` in the definition graph.
    ///
    /// A node trivially reaches itself. Unknown names reach nothing.
    pub fn can_reach(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    /// How many of `from`'s direct successors can reach `target`.
    ///
    /// This is the split criterion used by the join coordinator: a node with
    /// two or more such successors is a diverging point for that join.
    pub fn branching_paths_to(&self, spec: &ProcessSpec, from: &str, target: &str) -> usize {
        let Ok(node) = spec.resolve(from) else {
            return 0;
        };
        node.outgoing
            .iter()
            .filter(|succ| succ.as_str() == target || self.can_reach(succ, target))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
