use reqwest::{Client, Method};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use fibo_core::api::{OperationResponse, OperationStatus};
use fibo_core::config::{PollingConfig, RetryConfig};
use fibo_core::error::ApiError;

use crate::retry::send_with_retry;

/// What a single status check told us.
#[derive(Debug)]
pub(crate) enum PollState {
    Completed(Map<String, Value>),
    Failed(String),
    InFlight(OperationStatus),
    /// Could not make sense of the body; treated as still running.
    Malformed(String),
}

/// Poll `status_url` until the operation reaches a terminal state or the
/// cumulative polling budget runs out.
pub(crate) async fn poll_until_done(
    http: &Client,
    retry: &RetryConfig,
    polling: &PollingConfig,
    status_url: &str,
) -> Result<OperationResponse, ApiError> {
    let started = Instant::now();
    let mut last_status = OperationStatus::Pending;

    loop {
        let waited = started.elapsed();
        if waited >= polling.max_timeout() {
            return Err(ApiError::PollingTimeout {
                waited_ms: waited.as_millis() as u64,
                last_status: format!("{last_status:?}").to_lowercase(),
            });
        }

        let body = send_with_retry(http, retry, Method::GET, status_url, None).await?;
        match interpret(&body) {
            PollState::Completed(payload) => {
                debug!(status_url, elapsed_ms = waited.as_millis() as u64, "Operation completed");
                let mut response = OperationResponse::from_map(payload);
                response.status = OperationStatus::Completed;
                return Ok(response);
            }
            PollState::Failed(message) => return Err(ApiError::OperationFailed(message)),
            PollState::InFlight(status) => {
                debug!(status_url, ?status, "Operation still in progress");
                last_status = status;
            }
            PollState::Malformed(reason) => {
                warn!(status_url, reason = %reason, "Unexpected status response, will retry");
                last_status = OperationStatus::Running;
            }
        }

        tokio::time::sleep(polling.interval()).await;
    }
}

/// Classify a status endpoint body.
pub(crate) fn interpret(body: &str) -> PollState {
    let mut obj = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(obj)) => obj,
        Ok(other) => return PollState::Malformed(format!("expected an object, got {other}")),
        Err(e) => return PollState::Malformed(format!("invalid JSON: {e}")),
    };

    let status = match obj.get("status").and_then(Value::as_str) {
        Some(raw) => match OperationStatus::normalize(raw) {
            Some(s) => s,
            None => return PollState::Malformed(format!("unknown status '{raw}'")),
        },
        None => return PollState::Malformed("missing status".to_string()),
    };

    match status {
        OperationStatus::Completed => {
            // Lift the nested result to the top level.
            if let Some(Value::Object(result)) = obj.remove("result") {
                obj.extend(result);
            }
            PollState::Completed(obj)
        }
        OperationStatus::Failed => PollState::Failed(error_message(obj.get("error"))),
        in_flight => PollState::InFlight(in_flight),
    }
}

fn error_message(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(o)) => o
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(o.clone()).to_string()),
        Some(Value::Null) | None => "Unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completed_result_with_odd_fields_still_decodes() {
        let body = json!({
            "status": "COMPLETED",
            "result": {"image_url": 5, "seed": 1.5, "structured_prompt": "{\"mood\": \"calm\"}"}
        })
        .to_string();
        let PollState::Completed(payload) = interpret(&body) else {
            panic!("expected a completed state");
        };
        let response = OperationResponse::from_map(payload);
        assert_eq!(response.status, OperationStatus::Completed);
        assert_eq!(response.image_url, None);
        assert_eq!(response.seed, None);
        assert_eq!(response.extra["image_url"], 5);
        assert_eq!(response.extra["seed"], 1.5);
        assert_eq!(response.structured_prompt, Some(json!({"mood": "calm"})));
    }

    #[test]
    fn completed_result_is_flattened() {
        let body = json!({
            "status": "COMPLETED",
            "request_id": "r1",
            "result": {"image_url": "https://cdn/x.png", "seed": 9}
        })
        .to_string();
        match interpret(&body) {
            PollState::Completed(obj) => {
                assert_eq!(obj["image_url"], "https://cdn/x.png");
                assert_eq!(obj["seed"], 9);
                assert_eq!(obj["request_id"], "r1");
                assert!(obj.get("result").is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn provider_vocabulary_maps_to_canonical_states() {
        assert!(matches!(
            interpret(r#"{"status": "in_progress"}"#),
            PollState::InFlight(OperationStatus::Running)
        ));
        assert!(matches!(
            interpret(r#"{"status": "PENDING"}"#),
            PollState::InFlight(OperationStatus::Pending)
        ));
        assert!(matches!(interpret(r#"{"status": "unknown"}"#), PollState::Failed(_)));
    }

    #[test]
    fn failure_carries_provider_message() {
        match interpret(r#"{"status": "ERROR", "error": {"message": "nsfw content"}}"#) {
            PollState::Failed(msg) => assert_eq!(msg, "nsfw content"),
            other => panic!("unexpected: {other:?}"),
        }
        match interpret(r#"{"status": "failed", "error": "quota"}"#) {
            PollState::Failed(msg) => assert_eq!(msg, "quota"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_malformed_not_fatal() {
        assert!(matches!(interpret("<html>"), PollState::Malformed(_)));
        assert!(matches!(interpret("[1, 2]"), PollState::Malformed(_)));
        assert!(matches!(interpret(r#"{"result": {}}"#), PollState::Malformed(_)));
        assert!(matches!(interpret(r#"{"status": "napping"}"#), PollState::Malformed(_)));
    }
}
