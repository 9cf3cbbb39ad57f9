use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::NodeKind;

/// Canvas position of a node. Carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub data: NodeData,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            position: None,
            data: NodeData::default(),
        }
    }

    /// Set a static configuration value.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.config.insert(key.into(), value.into());
        self
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.data.config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(
        default,
        rename = "sourceHandle",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,
    #[serde(
        default,
        rename = "targetHandle",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_handle: Option<String>,
}

impl WorkflowEdge {
    /// An edge relying on the default output mapping.
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    /// Bind an explicit source output to a target input.
    pub fn with_handles(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_handle = Some(source.into());
        self.target_handle = Some(target.into());
        self
    }

    /// Both handles declared, so the value is copied verbatim.
    pub fn explicit_binding(&self) -> Option<(&str, &str)> {
        match (&self.source_handle, &self.target_handle) {
            (Some(s), Some(t)) => Some((s.as_str(), t.as_str())),
            _ => None,
        }
    }
}

/// The stored, serializable form of a workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDefinition {
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self { nodes, edges }
    }

    pub fn from_json(value: Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A user-owned, persisted workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub definition: WorkflowDefinition,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            description: None,
            definition,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_canvas_definition() {
        let def = WorkflowDefinition::from_json(json!({
            "nodes": [
                {"id": "a", "type": "StructuredPromptGenerateV2", "position": {"x": 0, "y": 10},
                 "data": {"config": {"prompt": "a lighthouse"}}},
                {"id": "b", "type": "ImageGenerateV2"}
            ],
            "edges": [
                {"id": "e1", "source": "a", "target": "b",
                 "sourceHandle": "structured_prompt", "targetHandle": "structured_prompt"}
            ]
        }))
        .unwrap();

        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.nodes[0].config()["prompt"], "a lighthouse");
        assert!(def.nodes[1].config().is_empty());
        assert_eq!(
            def.edges[0].explicit_binding(),
            Some(("structured_prompt", "structured_prompt"))
        );
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let err = WorkflowDefinition::from_json(json!({
            "nodes": [{"id": "a", "type": "Upscale"}],
            "edges": []
        }));
        assert!(err.is_err());
    }

    #[test]
    fn single_handle_is_not_explicit() {
        let mut edge = WorkflowEdge::new("e", "a", "b");
        edge.source_handle = Some("image_url".into());
        assert!(edge.explicit_binding().is_none());
    }

    #[test]
    fn handles_serialize_camel_case() {
        let edge = WorkflowEdge::new("e", "a", "b").with_handles("image_url", "image_url");
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["sourceHandle"], "image_url");
        assert!(value.get("source_handle").is_none());
    }
}
