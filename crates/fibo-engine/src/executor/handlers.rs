use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use fibo_core::api::{ImageGenerateRequest, StructuredPromptRequest};
use fibo_core::catalog::NodeKind;
use fibo_core::error::{FiboError, Result};
use fibo_core::run::{NodeExecutionRecord, NodeStatus};
use fibo_core::traits::ImageApi;

use super::inputs::Inputs;

/// Everything a handler may read or mutate while running one node.
pub struct NodeContext<'a> {
    pub node_id: &'a str,
    pub kind: NodeKind,
    pub inputs: &'a Map<String, Value>,
    pub record: &'a mut NodeExecutionRecord,
    pub api: &'a dyn ImageApi,
}

/// Executes one behavior class of node.
///
/// Handlers fill in the request/response audit fields of the record and
/// return the node's response. Leaving the record `Running` means "done";
/// a handler that parks the node sets the status itself.
pub trait NodeHandler: Send + Sync {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<Value>>;
}

/// Dispatch table. Adding a node kind fails to compile until it is routed.
pub fn handler_for(kind: NodeKind) -> &'static dyn NodeHandler {
    match kind {
        NodeKind::ImageGenerateV2 | NodeKind::ImageGenerateLiteV2 => &ImageGenerateHandler,
        NodeKind::StructuredPromptGenerateV2 | NodeKind::StructuredPromptGenerateLiteV2 => {
            &StructuredPromptHandler
        }
        NodeKind::ImageRefineV2 | NodeKind::ImageRefineLiteV2 => &ImageRefineHandler,
    }
}

/// One call to the image endpoint.
pub struct ImageGenerateHandler;

impl NodeHandler for ImageGenerateHandler {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let request = Inputs::new(ctx.node_id, ctx.inputs).image_request(ctx.kind)?;
            ctx.record.request = Some(serde_json::to_value(&request)?);

            let response = ctx.api.generate_image(ctx.kind.flavor(), request).await?;
            info!(
                node_id = ctx.node_id,
                request_id = %response.request_id,
                "Image generated"
            );
            Ok(response.to_value())
        })
    }
}

/// Generates a structured prompt and parks the node for review.
pub struct StructuredPromptHandler;

impl NodeHandler for StructuredPromptHandler {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            if let Some(approved) = ctx.record.approved_prompt.clone() {
                debug!(node_id = ctx.node_id, "Completing node from approved prompt");
                let request_id = ctx
                    .record
                    .request_id
                    .clone()
                    .unwrap_or_else(|| "approved".to_string());
                return Ok(json!({
                    "request_id": request_id,
                    "status": "completed",
                    "structured_prompt": approved,
                }));
            }

            let request = Inputs::new(ctx.node_id, ctx.inputs).prompt_request(ctx.kind)?;
            ctx.record.request = Some(serde_json::to_value(&request)?);

            let response = ctx
                .api
                .generate_structured_prompt(ctx.kind.flavor(), request)
                .await?;

            ctx.record.generated_prompt = Some(response.structured_prompt.clone().unwrap_or(Value::Null));
            ctx.record.request_id = Some(response.request_id.clone());
            ctx.record.status = NodeStatus::WaitingApproval;
            info!(
                node_id = ctx.node_id,
                request_id = %response.request_id,
                "Structured prompt generated, awaiting approval"
            );
            Ok(response.to_value())
        })
    }
}

/// Extracts a structured prompt from an image, then regenerates it with the
/// refinement applied.
pub struct ImageRefineHandler;

impl NodeHandler for ImageRefineHandler {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let inputs = Inputs::new(ctx.node_id, ctx.inputs);
            let image_url = inputs.required_text("image_url")?;
            let refinement_prompt = inputs.required_text("refinement_prompt")?;
            let options = inputs.generation_options()?;
            let flavor = ctx.kind.flavor();

            let mut combined = json!({
                "image_url": image_url,
                "refinement_prompt": refinement_prompt,
                "aspect_ratio": options.aspect_ratio,
                "steps_num": options.steps_num,
            });
            if let Some(seed) = options.seed {
                combined["seed"] = json!(seed);
            }
            ctx.record.request = Some(combined);

            let step1 = StructuredPromptRequest {
                images: Some(vec![image_url.clone()]),
                ..Default::default()
            };
            ctx.record.step1_request = Some(serde_json::to_value(&step1)?);
            let extracted = ctx.api.generate_structured_prompt(flavor, step1).await?;
            ctx.record.step1_response = Some(extracted.to_value());

            let original_prompt = extracted
                .structured_prompt
                .filter(|v| !v.is_null())
                .ok_or_else(|| FiboError::NodeStep {
                    node_id: ctx.node_id.to_string(),
                    message: "Failed to extract structured prompt from image in step 1".into(),
                })?;
            debug!(node_id = ctx.node_id, "Refine step 1 extracted structured prompt");

            let step2 = ImageGenerateRequest {
                prompt: Some(refinement_prompt),
                images: None,
                structured_prompt: Some(original_prompt.clone()),
                aspect_ratio: options.aspect_ratio,
                steps_num: options.steps_num,
                seed: options.seed,
            };
            ctx.record.step2_request = Some(serde_json::to_value(&step2)?);
            let refined = ctx.api.generate_image(flavor, step2).await?;
            ctx.record.step2_response = Some(refined.to_value());

            info!(
                node_id = ctx.node_id,
                request_id = %refined.request_id,
                "Image refined"
            );
            Ok(json!({
                "request_id": refined.request_id,
                "original_image_url": image_url,
                "refined_image_url": refined.image_url,
                "original_structured_prompt": original_prompt,
                "refined_structured_prompt": refined.structured_prompt,
                "seed": refined.seed,
            }))
        })
    }
}
