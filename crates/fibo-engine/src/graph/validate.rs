use std::collections::{HashMap, HashSet};

use serde::Serialize;

use fibo_core::catalog::NodeKind;
use fibo_core::workflow::WorkflowDefinition;

use super::order::topological_sort;
use crate::dataflow::default_bindings;

/// Diagnostic report for a workflow definition. Never fails; `valid` is
/// false when there is at least one error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub has_cycles: bool,
    pub disconnected_nodes: Vec<String>,
}

/// Outcome of checking one edge between two node kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionCheck {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConnectionCheck {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortType {
    Image,
    StructuredPrompt,
    Text,
    Number,
}

fn port_type(handle: &str) -> PortType {
    match handle {
        "image_url" | "images" | "refined_image_url" | "original_image_url" => PortType::Image,
        "structured_prompt" | "refined_structured_prompt" | "original_structured_prompt" => {
            PortType::StructuredPrompt
        }
        "seed" | "steps_num" => PortType::Number,
        _ => PortType::Text,
    }
}

/// Check that an edge between `source` and `target` can carry data.
pub fn validate_connection(
    source: NodeKind,
    target: NodeKind,
    source_handle: Option<&str>,
    target_handle: Option<&str>,
) -> ConnectionCheck {
    let mut check = ConnectionCheck::default();

    if let Some(h) = source_handle {
        if !source.produces_output(h) {
            check.errors.push(format!(
                "Source handle '{h}' not available in {source} outputs: {:?}",
                source.spec().outputs
            ));
        }
    }
    if let Some(h) = target_handle {
        if !target.accepts_input(h) {
            check.errors.push(format!(
                "Target handle '{h}' not available in {target} inputs: {:?}",
                target.spec().inputs
            ));
        }
    }

    match (source_handle, target_handle) {
        (Some(s), Some(t)) => {
            if check.errors.is_empty() && port_type(s) != port_type(t) {
                check.errors.push(format!(
                    "Cannot connect {source}.{s} to {target}.{t}: incompatible types"
                ));
            }
        }
        _ => {
            let bindings = default_bindings(source, target);
            if bindings.is_empty() {
                check.warnings.push(format!(
                    "No default mapping from {source} to {target}; \
                     set both sourceHandle and targetHandle to pass data"
                ));
            }
        }
    }

    check
}

/// Validate a stored definition: structure, handles, cycles, connectivity.
pub fn validate_definition(definition: &WorkflowDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();

    if definition.nodes.is_empty() {
        report.errors.push("Workflow must contain at least one node".to_string());
        return report;
    }

    let mut kinds: HashMap<&str, NodeKind> = HashMap::new();
    for node in &definition.nodes {
        if kinds.insert(node.id.as_str(), node.kind).is_some() {
            report.errors.push(format!("Duplicate node id: {}", node.id));
        }
        if node.config().is_empty() {
            report
                .warnings
                .push(format!("Node {} has no configuration data", node.id));
        }
    }

    let mut connected: HashSet<&str> = HashSet::new();
    let mut valid_edges = Vec::new();
    for edge in &definition.edges {
        let source = kinds.get(edge.source.as_str());
        let target = kinds.get(edge.target.as_str());
        if source.is_none() {
            report.errors.push(format!(
                "Edge {} references non-existent source node: {}",
                edge.id, edge.source
            ));
        }
        if target.is_none() {
            report.errors.push(format!(
                "Edge {} references non-existent target node: {}",
                edge.id, edge.target
            ));
        }
        let (Some(&source), Some(&target)) = (source, target) else {
            continue;
        };
        if edge.source == edge.target {
            report
                .errors
                .push(format!("Edge {} connects node {} to itself", edge.id, edge.source));
        }

        let check = validate_connection(
            source,
            target,
            edge.source_handle.as_deref(),
            edge.target_handle.as_deref(),
        );
        report
            .errors
            .extend(check.errors.into_iter().map(|e| format!("Edge {}: {e}", edge.id)));
        report
            .warnings
            .extend(check.warnings.into_iter().map(|w| format!("Edge {}: {w}", edge.id)));

        connected.insert(edge.source.as_str());
        connected.insert(edge.target.as_str());
        valid_edges.push((edge.source.as_str(), edge.target.as_str()));
    }

    let ids: Vec<&str> = definition.nodes.iter().map(|n| n.id.as_str()).collect();
    let (_, stuck) = topological_sort(&ids, valid_edges.iter().copied());
    if !stuck.is_empty() {
        report.has_cycles = true;
        report.errors.push(format!(
            "Workflow contains cycles, which are not allowed (nodes: {})",
            stuck.join(", ")
        ));
    }

    if ids.len() > 1 {
        report.disconnected_nodes = ids
            .iter()
            .filter(|id| !connected.contains(*id))
            .map(|id| id.to_string())
            .collect();
        for id in &report.disconnected_nodes {
            report
                .warnings
                .push(format!("Node {id} is not connected to any other nodes"));
        }
    }

    if valid_edges.is_empty() {
        if ids.len() > 1 {
            report
                .warnings
                .push("Workflow has multiple nodes but no connections between them".to_string());
        }
    } else {
        let with_incoming: HashSet<&str> = valid_edges.iter().map(|(_, t)| *t).collect();
        let with_outgoing: HashSet<&str> = valid_edges.iter().map(|(s, _)| *s).collect();
        if ids.iter().all(|id| with_incoming.contains(id)) {
            report.warnings.push(
                "Workflow has no clear starting point (all nodes have incoming connections)"
                    .to_string(),
            );
        }
        if ids.iter().all(|id| with_outgoing.contains(id)) {
            report.warnings.push(
                "Workflow has no clear ending point (all nodes have outgoing connections)"
                    .to_string(),
            );
        }
    }

    report.valid = report.errors.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibo_core::workflow::{WorkflowEdge, WorkflowNode};

    fn sp(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, NodeKind::StructuredPromptGenerateV2).with_config("prompt", "a cat")
    }

    fn gen(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, NodeKind::ImageGenerateV2).with_config("aspect_ratio", "16:9")
    }

    #[test]
    fn valid_pipeline_has_no_findings() {
        let def = WorkflowDefinition::new(
            vec![sp("a"), gen("b")],
            vec![WorkflowEdge::new("e1", "a", "b").with_handles("structured_prompt", "structured_prompt")],
        );
        let report = validate_definition(&def);
        assert!(report.valid, "{report:?}");
        assert!(report.warnings.is_empty(), "{report:?}");
        assert!(!report.has_cycles);
    }

    #[test]
    fn empty_workflow_is_invalid() {
        let report = validate_definition(&WorkflowDefinition::default());
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Workflow must contain at least one node"]);
    }

    #[test]
    fn dangling_and_cyclic_edges_are_errors() {
        let def = WorkflowDefinition::new(
            vec![gen("a"), gen("b")],
            vec![
                WorkflowEdge::new("e1", "a", "b"),
                WorkflowEdge::new("e2", "b", "a"),
                WorkflowEdge::new("e3", "b", "nowhere"),
            ],
        );
        let report = validate_definition(&def);
        assert!(!report.valid);
        assert!(report.has_cycles);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("non-existent target node: nowhere")));
        assert!(report.warnings.iter().any(|w| w.contains("no clear starting point")));
        assert!(report.warnings.iter().any(|w| w.contains("no clear ending point")));
    }

    #[test]
    fn disconnected_nodes_are_warnings() {
        let def = WorkflowDefinition::new(
            vec![sp("a"), gen("b"), WorkflowNode::new("c", NodeKind::ImageRefineV2)],
            vec![WorkflowEdge::new("e1", "a", "b")],
        );
        let report = validate_definition(&def);
        assert!(report.valid);
        assert_eq!(report.disconnected_nodes, vec!["c"]);
        assert!(report.warnings.iter().any(|w| w == "Node c has no configuration data"));
    }

    #[test]
    fn unconnected_nodes_warn() {
        let def = WorkflowDefinition::new(vec![gen("a"), gen("b")], vec![]);
        let report = validate_definition(&def);
        assert!(report.valid);
        assert!(report
            .warnings
            .contains(&"Workflow has multiple nodes but no connections between them".to_string()));
        assert_eq!(report.disconnected_nodes, vec!["a", "b"]);
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let check = validate_connection(
            NodeKind::StructuredPromptGenerateV2,
            NodeKind::ImageGenerateV2,
            Some("image_url"),
            Some("images"),
        );
        assert!(!check.is_valid());
        assert!(check.errors[0].contains("Source handle 'image_url'"));
    }

    #[test]
    fn mismatched_port_types_are_rejected() {
        let check = validate_connection(
            NodeKind::ImageGenerateV2,
            NodeKind::ImageGenerateV2,
            Some("image_url"),
            Some("structured_prompt"),
        );
        assert!(!check.is_valid());
    }

    #[test]
    fn refined_image_feeds_images() {
        let check = validate_connection(
            NodeKind::ImageRefineV2,
            NodeKind::ImageGenerateLiteV2,
            Some("refined_image_url"),
            Some("images"),
        );
        assert!(check.is_valid(), "{check:?}");
    }

    #[test]
    fn mapped_default_pairs_are_clean() {
        for (source, target) in [
            (NodeKind::ImageGenerateV2, NodeKind::ImageGenerateLiteV2),
            (NodeKind::ImageRefineV2, NodeKind::ImageGenerateV2),
            (NodeKind::ImageGenerateV2, NodeKind::ImageRefineV2),
            (NodeKind::StructuredPromptGenerateV2, NodeKind::ImageGenerateV2),
        ] {
            let check = validate_connection(source, target, None, None);
            assert_eq!(check, ConnectionCheck::default(), "{source} -> {target}");
        }
    }

    #[test]
    fn unmapped_pairs_warn_without_handles() {
        let check = validate_connection(
            NodeKind::StructuredPromptGenerateV2,
            NodeKind::ImageRefineV2,
            None,
            None,
        );
        assert!(check.is_valid());
        assert_eq!(check.warnings.len(), 1);
    }
}
