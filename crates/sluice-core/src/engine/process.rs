//! Process definition ownership and validation.
//!
//! `ProcessSpec` owns every `NodeSpec` of one process definition, preserves
//! insertion order, enforces name uniqueness, and wires directed edges. Once
//! `validate` passes, the spec is treated as read-only: workflows hold it for
//! their whole lifetime and never mutate it.

use std::collections::HashMap;

use sluice_types::process::NodeSpec;
use thiserror::Error;

use super::graph::SpecGraph;

/// Name of the synthetic start node every process spec begins with.
pub const START_NODE: &str = "Start";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while building or finalizing a process definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// Two node specs collide on name.
    #[error("duplicate node name: '{0}'")]
    DuplicateName(String),

    /// A lookup by name failed to resolve.
    #[error("unknown node: '{0}'")]
    UnknownNode(String),

    /// A node is not reachable from the start node.
    #[error("node '{0}' is not reachable from the start node")]
    Unreachable(String),
}

// ---------------------------------------------------------------------------
// ProcessSpec
// ---------------------------------------------------------------------------

/// One full process definition: the owner of all its node specs.
///
/// Nodes are kept in insertion order; the name index makes `resolve` cheap.
/// The designated start node is created by `new` so that every definition
/// has a single entry point by construction.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    name: String,
    nodes: Vec<NodeSpec>,
    index: HashMap<String, usize>,
    start: String,
}

impl ProcessSpec {
    /// Create an empty process definition seeded with its start node.
    pub fn new(name: impl Into<String>) -> Self {
        let mut spec = Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            start: START_NODE.to_string(),
        };
        // Cannot collide: the spec is empty.
        let _ = spec.add_node(NodeSpec::simple(START_NODE));
        spec
    }

    /// Rebuild a spec from already-decoded nodes (serializer path).
    ///
    /// Edges are taken from the nodes' own incoming/outgoing lists; only
    /// name uniqueness and start existence are enforced here, the caller
    /// runs `validate` separately.
    pub fn from_nodes(
        name: impl Into<String>,
        start: impl Into<String>,
        nodes: Vec<NodeSpec>,
    ) -> Result<Self, ProcessError> {
        let start = start.into();
        let mut spec = Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            start: start.clone(),
        };
        for node in nodes {
            spec.add_node(node)?;
        }
        spec.resolve(&start)?;
        Ok(spec)
    }

    /// Process name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the designated start node.
    pub fn start(&self) -> &str {
        &self.start
    }

    /// All node specs in insertion order.
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Add a node spec, failing on name collision.
    pub fn add_node(&mut self, node: NodeSpec) -> Result<(), ProcessError> {
        if self.index.contains_key(&node.name) {
            return Err(ProcessError::DuplicateName(node.name));
        }
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Look up a node spec by name.
    pub fn resolve(&self, name: &str) -> Result<&NodeSpec, ProcessError> {
        self.index
            .get(name)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| ProcessError::UnknownNode(name.to_string()))
    }

    /// Add a directed edge between two existing nodes.
    ///
    /// The edge is recorded on both endpoints so the spec serializes without
    /// a separate edge table. Connection order is preserved.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<(), ProcessError> {
        let from_idx = *self
            .index
            .get(from)
            .ok_or_else(|| ProcessError::UnknownNode(from.to_string()))?;
        let to_idx = *self
            .index
            .get(to)
            .ok_or_else(|| ProcessError::UnknownNode(to.to_string()))?;

        self.nodes[from_idx].outgoing.push(to.to_string());
        self.nodes[to_idx].incoming.push(from.to_string());
        Ok(())
    }

    /// Finalize the definition: every node must be reachable from the start
    /// node. Cycles are legal (loops are ordinary process constructs); only
    /// reachability is enforced.
    pub fn validate(&self) -> Result<(), ProcessError> {
        let graph = SpecGraph::compile(self);
        for node in &self.nodes {
            if !graph.can_reach(&self.start, &node.name) {
                return Err(ProcessError::Unreachable(node.name.clone()));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_spec_has_start_node() {
        let spec = ProcessSpec::new("review");
        assert_eq!(spec.start(), START_NODE);
        assert!(spec.resolve(START_NODE).is_ok());
        assert_eq!(spec.nodes().len(), 1);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut spec = ProcessSpec::new("p");
        spec.add_node(NodeSpec::simple("a")).unwrap();
        let err = spec.add_node(NodeSpec::join("a")).unwrap_err();
        assert_eq!(err, ProcessError::DuplicateName("a".to_string()));
    }

    #[test]
    fn connect_records_both_endpoints() {
        let mut spec = ProcessSpec::new("p");
        spec.add_node(NodeSpec::simple("a")).unwrap();
        spec.connect(START_NODE, "a").unwrap();

        assert_eq!(spec.resolve(START_NODE).unwrap().outgoing, vec!["a"]);
        assert_eq!(spec.resolve("a").unwrap().incoming, vec![START_NODE]);
    }

    #[test]
    fn connect_unknown_endpoint_fails() {
        let mut spec = ProcessSpec::new("p");
        let err = spec.connect(START_NODE, "ghost").unwrap_err();
        assert_eq!(err, ProcessError::UnknownNode("ghost".to_string()));
        let err = spec.connect("ghost", START_NODE).unwrap_err();
        assert_eq!(err, ProcessError::UnknownNode("ghost".to_string()));
    }

    #[test]
    fn resolve_unknown_fails() {
        let spec = ProcessSpec::new("p");
        assert_eq!(
            spec.resolve("nope").unwrap_err(),
            ProcessError::UnknownNode("nope".to_string())
        );
    }

    #[test]
    fn validate_flags_unreachable_node() {
        let mut spec = ProcessSpec::new("p");
        spec.add_node(NodeSpec::simple("a")).unwrap();
        spec.add_node(NodeSpec::simple("island")).unwrap();
        spec.connect(START_NODE, "a").unwrap();

        let err = spec.validate().unwrap_err();
        assert_eq!(err, ProcessError::Unreachable("island".to_string()));
    }

    #[test]
    fn validate_accepts_cycles() {
        // Start -> a -> b -> a is a loop, not an error.
        let mut spec = ProcessSpec::new("p");
        spec.add_node(NodeSpec::simple("a")).unwrap();
        spec.add_node(NodeSpec::simple("b")).unwrap();
        spec.connect(START_NODE, "a").unwrap();
        spec.connect("a", "b").unwrap();
        spec.connect("b", "a").unwrap();

        assert!(spec.validate().is_ok());
    }

    #[test]
    fn insertion_order_preserved() {
        let mut spec = ProcessSpec::new("p");
        for name in ["c", "a", "b"] {
            spec.add_node(NodeSpec::simple(name)).unwrap();
        }
        let names: Vec<&str> = spec.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec![START_NODE, "c", "a", "b"]);
    }
}
