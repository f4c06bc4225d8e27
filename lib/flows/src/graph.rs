//! Flow graph index using petgraph.
//!
//! Built once per execution from the flow's stored nodes and edges. Edges
//! whose endpoints reference missing nodes are dropped, and successors are
//! returned in edge insertion order so walks are deterministic.

use crate::model::{FlowEdge, FlowNode, NodeType};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// A flow's nodes and edges indexed for traversal.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    /// The underlying directed graph.
    graph: DiGraph<FlowNode, FlowEdge>,
    /// Map from graph-local node ID to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from stored rows.
    #[must_use]
    pub fn build(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> Self {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node);
        }
        for edge in edges {
            graph.add_edge(edge);
        }
        graph
    }

    /// Adds a node. Returns false if a node with the same ID already exists.
    pub fn add_node(&mut self, node: FlowNode) -> bool {
        if self.node_index_map.contains_key(&node.node_id) {
            return false;
        }
        let node_id = node.node_id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        true
    }

    /// Adds an edge. Returns false if either endpoint is missing.
    pub fn add_edge(&mut self, edge: FlowEdge) -> bool {
        let (Some(&source), Some(&target)) = (
            self.node_index_map.get(&edge.source_node),
            self.node_index_map.get(&edge.target_node),
        ) else {
            return false;
        };
        self.graph.add_edge(source, target, edge);
        true
    }

    /// Returns a node by its graph-local ID.
    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<&FlowNode> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.graph.node_weights()
    }

    /// Returns the trigger nodes in insertion order.
    pub fn trigger_nodes(&self) -> Vec<&FlowNode> {
        self.nodes()
            .filter(|n| n.node_type == NodeType::Trigger)
            .collect()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the successors of a node in edge insertion order.
    pub fn successors(&self, node_id: &str) -> Vec<&FlowNode> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .collect();
        edges.sort_by_key(|e| e.id());
        edges
            .into_iter()
            .filter_map(|e| self.graph.node_weight(e.target()))
            .collect()
    }

    /// Returns true if the graph contains a cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }
}
