//! Test doubles and fixtures shared by the fibo crates.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use fibo_core::api::{
    ImageGenerateRequest, Operation, OperationResponse, OperationStatus, StructuredPromptRequest,
};
use fibo_core::catalog::{Flavor, NodeKind};
use fibo_core::error::ApiError;
use fibo_core::traits::ImageApi;
use fibo_core::workflow::{WorkflowDefinition, WorkflowEdge, WorkflowNode};

type Scripted = std::result::Result<OperationResponse, ApiError>;

/// One recorded call against a [`ScriptedApi`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub operation: Operation,
    pub payload: Value,
}

/// An [`ImageApi`] that replays queued outcomes and records every call.
///
/// When a queue runs dry the double answers with a deterministic completed
/// response: images at `https://img.test/{n}.png` (n counts image calls from
/// 1) and structured prompts `{"description": <prompt or "from images">}`.
#[derive(Default)]
pub struct ScriptedApi {
    images: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_image(&self, outcome: Scripted) -> &Self {
        self.images.lock().unwrap().push_back(outcome);
        self
    }

    pub fn push_prompt(&self, outcome: Scripted) -> &Self {
        self.prompts.lock().unwrap().push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, operation: Operation, payload: Value) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push(ApiCall { operation, payload });
        calls
            .iter()
            .filter(|c| c.operation.produces_image() == operation.produces_image())
            .count()
    }
}

impl ImageApi for ScriptedApi {
    fn generate_image(
        &self,
        flavor: Flavor,
        request: ImageGenerateRequest,
    ) -> BoxFuture<'_, Scripted> {
        Box::pin(async move {
            let operation = Operation::image(flavor);
            let n = self.record(operation, serde_json::to_value(&request).unwrap());
            if let Some(outcome) = self.images.lock().unwrap().pop_front() {
                return outcome;
            }
            Ok(image_response(n, request.seed.unwrap_or(n as i64), request.structured_prompt))
        })
    }

    fn generate_structured_prompt(
        &self,
        flavor: Flavor,
        request: StructuredPromptRequest,
    ) -> BoxFuture<'_, Scripted> {
        Box::pin(async move {
            let operation = Operation::structured_prompt(flavor);
            let n = self.record(operation, serde_json::to_value(&request).unwrap());
            if let Some(outcome) = self.prompts.lock().unwrap().pop_front() {
                return outcome;
            }
            let description = request.prompt.unwrap_or_else(|| "from images".to_string());
            Ok(prompt_response(&format!("sp-{n}"), json!({ "description": description })))
        })
    }
}

/// A completed image response.
pub fn image_response(n: usize, seed: i64, structured_prompt: Option<Value>) -> OperationResponse {
    OperationResponse {
        request_id: format!("img-{n}"),
        status: OperationStatus::Completed,
        image_url: Some(format!("https://img.test/{n}.png")),
        seed: Some(seed),
        structured_prompt: Some(structured_prompt.unwrap_or_else(|| json!({"rendered": n}))),
        ..Default::default()
    }
}

/// A completed structured prompt response.
pub fn prompt_response(request_id: &str, structured_prompt: Value) -> OperationResponse {
    OperationResponse {
        request_id: request_id.to_string(),
        status: OperationStatus::Completed,
        structured_prompt: Some(structured_prompt),
        ..Default::default()
    }
}

pub fn node(id: &str, kind: NodeKind) -> WorkflowNode {
    WorkflowNode::new(id, kind)
}

pub fn edge(source: &str, target: &str) -> WorkflowEdge {
    WorkflowEdge::new(format!("{source}-{target}"), source, target)
}

/// A linear chain: each node feeds the next with default mapping.
pub fn chain(nodes: Vec<WorkflowNode>) -> WorkflowDefinition {
    let edges = nodes
        .windows(2)
        .map(|pair| edge(&pair[0].id, &pair[1].id))
        .collect();
    WorkflowDefinition::new(nodes, edges)
}

/// Structured prompt → image generation, the canonical approval workflow.
pub fn prompt_then_image(prompt: &str) -> WorkflowDefinition {
    WorkflowDefinition::new(
        vec![
            node("sp", NodeKind::StructuredPromptGenerateV2).with_config("prompt", prompt),
            node("img", NodeKind::ImageGenerateV2).with_config("aspect_ratio", "16:9"),
        ],
        vec![WorkflowEdge::new("e1", "sp", "img")
            .with_handles("structured_prompt", "structured_prompt")],
    )
}
