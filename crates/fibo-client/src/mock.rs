use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::info;

use fibo_core::api::{
    ImageGenerateRequest, Operation, OperationResponse, OperationStatus, StructuredPromptRequest,
};
use fibo_core::catalog::Flavor;
use fibo_core::error::ApiError;
use fibo_core::traits::ImageApi;

const MOCK_SEED: i64 = 42;

/// Offline stand-in for the image API. Makes no network calls and returns
/// deterministic completed responses after a simulated delay.
pub struct MockClient {
    latency: Duration,
}

impl MockClient {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    fn image_response(operation: Operation, request: &ImageGenerateRequest) -> OperationResponse {
        let seed = request.seed.unwrap_or(MOCK_SEED);
        let structured_prompt = request.structured_prompt.clone().unwrap_or_else(|| {
            json!({
                "short_description": request.prompt.clone().unwrap_or_else(|| "mock image".into()),
                "style_medium": "photograph",
            })
        });
        OperationResponse {
            request_id: format!("mock-{}-{seed}", slug(operation)),
            status: OperationStatus::Completed,
            image_url: Some(format!(
                "https://mock.fibo.local/{}/{seed}.png",
                slug(operation)
            )),
            seed: Some(seed),
            structured_prompt: Some(structured_prompt),
            ..Default::default()
        }
    }

    fn prompt_response(operation: Operation, request: &StructuredPromptRequest) -> OperationResponse {
        let description = request
            .prompt
            .clone()
            .unwrap_or_else(|| "an image described from its references".into());
        let mut structured = json!({
            "short_description": description,
            "style_medium": "photograph",
            "lighting": {"conditions": "soft daylight"},
            "aesthetics": {"composition": "centered"},
        });
        if let (Some(Value::Object(base)), Value::Object(out)) =
            (request.structured_prompt.clone(), &mut structured)
        {
            out.extend(base);
        }
        if let Some(images) = &request.images {
            structured["reference_images"] = json!(images.len());
        }
        OperationResponse {
            request_id: format!("mock-{}", slug(operation)),
            status: OperationStatus::Completed,
            structured_prompt: Some(structured),
            ..Default::default()
        }
    }
}

fn slug(operation: Operation) -> &'static str {
    match operation {
        Operation::ImageGenerate => "image",
        Operation::ImageGenerateLite => "image-lite",
        Operation::StructuredPromptGenerate => "structured-prompt",
        Operation::StructuredPromptGenerateLite => "structured-prompt-lite",
    }
}

impl ImageApi for MockClient {
    fn generate_image(
        &self,
        flavor: Flavor,
        request: ImageGenerateRequest,
    ) -> BoxFuture<'_, Result<OperationResponse, ApiError>> {
        Box::pin(async move {
            let operation = Operation::image(flavor);
            info!(%operation, "Serving operation from mock mode");
            tokio::time::sleep(self.latency).await;
            Ok(Self::image_response(operation, &request))
        })
    }

    fn generate_structured_prompt(
        &self,
        flavor: Flavor,
        request: StructuredPromptRequest,
    ) -> BoxFuture<'_, Result<OperationResponse, ApiError>> {
        Box::pin(async move {
            let operation = Operation::structured_prompt(flavor);
            info!(%operation, "Serving operation from mock mode");
            tokio::time::sleep(self.latency * 3 / 5).await;
            Ok(Self::prompt_response(operation, &request))
        })
    }
}
