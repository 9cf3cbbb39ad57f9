use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use fibo_core::api::{
    ImageGenerateRequest, Operation, OperationResponse, OperationStatus, StructuredPromptRequest,
};
use fibo_core::catalog::Flavor;
use fibo_core::config::{ApiConfig, PollingConfig, RetryConfig};
use fibo_core::error::{ApiError, FiboError, Result};
use fibo_core::traits::ImageApi;

use crate::polling::poll_until_done;
use crate::retry::send_with_retry;

/// HTTP client for the image-generation API.
///
/// Holds one pooled `reqwest::Client` for its whole lifetime; share it behind
/// an `Arc` rather than constructing one per call.
pub struct BriaClient {
    http: Client,
    base_url: String,
    retry: RetryConfig,
    polling: PollingConfig,
}

impl BriaClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let token = config.api_token.as_deref().ok_or_else(|| {
            FiboError::Config("api.api_token is required unless api.mock_mode is enabled".into())
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "api_token",
            HeaderValue::from_str(token)
                .map_err(|e| FiboError::Config(format!("invalid api_token: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| FiboError::Config(format!("invalid user_agent: {e}")))?,
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FiboError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry.clone(),
            polling: config.polling.clone(),
        })
    }

    /// Submit an operation and wait for its terminal result.
    pub async fn submit<T: Serialize>(
        &self,
        operation: Operation,
        request: &T,
    ) -> std::result::Result<OperationResponse, ApiError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| ApiError::InvalidResponse(format!("unserializable request: {e}")))?;
        let url = format!("{}{}", self.base_url, operation.path());

        let body = send_with_retry(&self.http, &self.retry, Method::POST, &url, Some(&payload)).await?;
        let response: OperationResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("{e}: {body}")))?;

        if response.is_pending() {
            let status_url = self.resolve(response.status_url.as_deref().unwrap_or_default());
            debug!(%operation, request_id = %response.request_id, status_url = %status_url, "Polling async operation");
            let mut done = poll_until_done(&self.http, &self.retry, &self.polling, &status_url).await?;
            if done.request_id.is_empty() {
                done.request_id = response.request_id;
            }
            return Ok(done);
        }

        if response.status == OperationStatus::Failed {
            let message = response
                .extra
                .get("error")
                .map(|e| match e {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(ApiError::OperationFailed(message));
        }

        Ok(response)
    }

    /// Status URLs may come back relative to the API root.
    fn resolve(&self, status_url: &str) -> String {
        if status_url.starts_with("http://") || status_url.starts_with("https://") {
            status_url.to_string()
        } else {
            format!("{}/{}", self.base_url, status_url.trim_start_matches('/'))
        }
    }
}

impl ImageApi for BriaClient {
    fn generate_image(
        &self,
        flavor: Flavor,
        request: ImageGenerateRequest,
    ) -> BoxFuture<'_, std::result::Result<OperationResponse, ApiError>> {
        Box::pin(async move { self.submit(Operation::image(flavor), &request).await })
    }

    fn generate_structured_prompt(
        &self,
        flavor: Flavor,
        request: StructuredPromptRequest,
    ) -> BoxFuture<'_, std::result::Result<OperationResponse, ApiError>> {
        Box::pin(async move {
            self.submit(Operation::structured_prompt(flavor), &request)
                .await
        })
    }
}
