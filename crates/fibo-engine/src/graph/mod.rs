//! Workflow graphs: structure, ordering, and validation.
//!
//! A [`WorkflowGraph`] is an immutable view over a stored
//! [`WorkflowDefinition`] whose structural invariants have been checked:
//! it has at least one node, node ids are unique, and every edge endpoint
//! names an existing node. Execution order is computed with Kahn's
//! algorithm (see [`order`]); [`validate`] produces a non-fatal diagnostic
//! report for editors.

pub mod order;
pub mod validate;

use std::collections::HashMap;

use fibo_core::error::{FiboError, Result};
use fibo_core::workflow::{WorkflowDefinition, WorkflowEdge, WorkflowNode};

pub use order::topological_sort;
pub use validate::{validate_connection, validate_definition, ConnectionCheck, ValidationReport};

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    index: HashMap<String, usize>,
}

impl WorkflowGraph {
    /// Build a graph, rejecting structurally broken definitions.
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self> {
        if definition.nodes.is_empty() {
            return Err(FiboError::EmptyGraph);
        }

        let mut index = HashMap::with_capacity(definition.nodes.len());
        for (i, node) in definition.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(FiboError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in &definition.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !index.contains_key(endpoint) {
                    return Err(FiboError::DanglingEdge {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
        }

        Ok(Self {
            nodes: definition.nodes.clone(),
            edges: definition.edges.clone(),
            index,
        })
    }

    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Edges ending at `node_id`, in definition order.
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Edges leaving `node_id`, in definition order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Deterministic topological order of all node ids.
    ///
    /// Ties break in node-list order. Fails with `CyclicGraph` if some nodes
    /// can never become ready.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        let ids: Vec<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        let edges = self
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()));
        let (order, stuck) = topological_sort(&ids, edges);
        if !stuck.is_empty() {
            return Err(FiboError::CyclicGraph { nodes: stuck });
        }
        Ok(order)
    }
}
