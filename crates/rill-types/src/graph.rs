//! Compiled call-graph model.
//!
//! The pipeline front-end (out of scope here) resolves a source program into
//! a [`CallGraph`]: a set of call nodes, each naming a registered callable,
//! a fixed argument list, and optionally the placeholder its result is
//! published under. The engine only ever invokes; it never inspects the
//! callable itself.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::value::Value;

// ── Nodes ────────────────────────────────────────────────────────────────────

/// Identifier of a call node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One argument position: either a literal or the output of another node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArgExpr {
    Literal(Value),
    Node(NodeId),
}

/// A single call in the compiled graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallNode {
    pub id: NodeId,
    /// Fully qualified callable name, resolved at graph-build time.
    pub callable: String,
    pub positional: Vec<ArgExpr>,
    /// Keyword arguments as `(name, expr)` pairs. Call-site order is
    /// irrelevant for fingerprinting (the hasher sorts by name).
    pub keyword: Vec<(String, ArgExpr)>,
    /// Placeholder name this node's result is published under, if any.
    pub placeholder: Option<String>,
    /// Side-effecting calls are always dispatched and never memoized.
    pub impure: bool,
}

impl CallNode {
    /// Node ids this call reads from, in argument order.
    pub fn dependencies(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.positional
            .iter()
            .chain(self.keyword.iter().map(|(_, expr)| expr))
            .filter_map(|expr| match expr {
                ArgExpr::Node(id) => Some(*id),
                ArgExpr::Literal(_) => None,
            })
    }
}

// ── Graph ────────────────────────────────────────────────────────────────────

/// A validated, acyclic call graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallGraph {
    nodes: Vec<CallNode>,
}

impl CallGraph {
    /// Build a graph from nodes, validating id uniqueness, reference
    /// integrity and acyclicity.
    pub fn new(nodes: Vec<CallNode>) -> Result<Self, GraphError> {
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.id) {
                return Err(GraphError::DuplicateNode(node.id.0));
            }
        }
        for node in &nodes {
            for dep in node.dependencies() {
                if !seen.contains(&dep) {
                    return Err(GraphError::UnknownNode(dep.0));
                }
            }
        }

        let graph = Self { nodes };
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn nodes(&self) -> &[CallNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&CallNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Node publishing the given placeholder, if any.
    pub fn placeholder_node(&self, name: &str) -> Option<&CallNode> {
        self.nodes
            .iter()
            .find(|n| n.placeholder.as_deref() == Some(name))
    }

    /// All placeholder names defined by this graph.
    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|n| n.placeholder.as_deref())
    }

    /// Kahn's algorithm; rejects dependency cycles.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut indegree: HashMap<NodeId, usize> =
            self.nodes.iter().map(|n| (n.id, 0)).collect();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in &self.nodes {
            for dep in node.dependencies() {
                dependents.entry(dep).or_default().push(node.id);
                *indegree.entry(node.id).or_insert(0) += 1;
            }
        }

        let mut ready: Vec<NodeId> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = ready.pop() {
            visited += 1;
            if let Some(next) = dependents.get(&id) {
                for dependent in next {
                    let deg = indegree.get_mut(dependent).expect("known node");
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(*dependent);
                    }
                }
            }
        }

        if visited == self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::Cycle)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
