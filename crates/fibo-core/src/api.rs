//! Wire types for the image-generation API.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::catalog::Flavor;

pub const DEFAULT_ASPECT_RATIO: &str = "1:1";
pub const DEFAULT_STEPS_NUM: u32 = 50;
pub const ASPECT_RATIOS: &[&str] = &["1:1", "16:9", "9:16", "4:3", "3:4"];

/// An API operation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ImageGenerate,
    ImageGenerateLite,
    StructuredPromptGenerate,
    StructuredPromptGenerateLite,
}

impl Operation {
    pub fn image(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Standard => Operation::ImageGenerate,
            Flavor::Lite => Operation::ImageGenerateLite,
        }
    }

    pub fn structured_prompt(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Standard => Operation::StructuredPromptGenerate,
            Flavor::Lite => Operation::StructuredPromptGenerateLite,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Operation::ImageGenerate => "/image/generate",
            Operation::ImageGenerateLite => "/image/generate/lite",
            Operation::StructuredPromptGenerate => "/structured_prompt/generate",
            Operation::StructuredPromptGenerateLite => "/structured_prompt/generate/lite",
        }
    }

    pub fn produces_image(self) -> bool {
        matches!(self, Operation::ImageGenerate | Operation::ImageGenerateLite)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_prompt: Option<Value>,
    pub aspect_ratio: String,
    pub steps_num: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl Default for ImageGenerateRequest {
    fn default() -> Self {
        Self {
            prompt: None,
            images: None,
            structured_prompt: None,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            steps_num: DEFAULT_STEPS_NUM,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredPromptRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_prompt: Option<Value>,
}

/// Canonical operation status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    /// Map the provider's status vocabulary onto the canonical set.
    /// Returns `None` for values the provider is not known to send.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Some(OperationStatus::Pending),
            "running" | "in_progress" => Some(OperationStatus::Running),
            "completed" | "complete" | "succeeded" => Some(OperationStatus::Completed),
            "failed" | "error" | "unknown" => Some(OperationStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl<'de> Deserialize<'de> for OperationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Unrecognized values are treated as still in flight.
        let raw = String::deserialize(deserializer)?;
        Ok(OperationStatus::normalize(&raw).unwrap_or(OperationStatus::Running))
    }
}

/// Normalized response of an operation, immediate or polled to completion.
///
/// Decoding is lenient: a known field with an unexpected type is kept in
/// `extra` under its own name instead of failing the whole response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationResponse {
    pub request_id: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_prompt: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for OperationResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_map(Map::deserialize(deserializer)?))
    }
}

impl OperationResponse {
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        // Unrecognized values are treated as still in flight.
        let status = match map.remove("status") {
            None | Some(Value::Null) => OperationStatus::Pending,
            Some(Value::String(raw)) => {
                OperationStatus::normalize(&raw).unwrap_or(OperationStatus::Running)
            }
            Some(_) => OperationStatus::Running,
        };
        let structured_prompt = match map.remove("structured_prompt") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(parse_json_string(s)),
            Some(other) => Some(other),
        };
        Self {
            request_id: take(&mut map, "request_id", |v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_default(),
            status,
            status_url: take(&mut map, "status_url", |v| v.as_str().map(str::to_string)),
            image_url: take(&mut map, "image_url", |v| v.as_str().map(str::to_string)),
            seed: take(&mut map, "seed", integral),
            structured_prompt,
            extra: map,
        }
    }

    /// Still needs polling at `status_url`.
    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal() && self.status_url.is_some()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Remove `key` when `convert` accepts its value; otherwise leave it in place.
fn take<T>(map: &mut Map<String, Value>, key: &str, convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
    let converted = map.get(key).and_then(&convert)?;
    map.remove(key);
    Some(converted)
}

/// Integers, including floats with no fractional part (`9.0`).
fn integral(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Parse a JSON-encoded string, keeping the raw string when it is not JSON.
pub fn parse_json_string(s: String) -> Value {
    match serde_json::from_str::<Value>(&s) {
        Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed,
        _ => Value::String(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_absent_fields() {
        let req = ImageGenerateRequest {
            prompt: Some("a fox".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"prompt": "a fox", "aspect_ratio": "1:1", "steps_num": 50})
        );
        assert_eq!(
            serde_json::to_value(StructuredPromptRequest::default()).unwrap(),
            json!({})
        );
    }

    #[test]
    fn status_vocabulary_is_normalized() {
        assert_eq!(OperationStatus::normalize("IN_PROGRESS"), Some(OperationStatus::Running));
        assert_eq!(OperationStatus::normalize("unknown"), Some(OperationStatus::Failed));
        assert_eq!(OperationStatus::normalize("ERROR"), Some(OperationStatus::Failed));
        assert_eq!(OperationStatus::normalize("Completed"), Some(OperationStatus::Completed));
        assert_eq!(OperationStatus::normalize("sleeping"), None);
    }

    #[test]
    fn response_parses_string_structured_prompt() {
        let resp: OperationResponse = serde_json::from_value(json!({
            "request_id": "r1",
            "status": "COMPLETED",
            "structured_prompt": "{\"style\": \"noir\"}",
            "image_url": "https://cdn/x.png",
            "seed": 7,
            "content_moderated": false
        }))
        .unwrap();
        assert_eq!(resp.status, OperationStatus::Completed);
        assert_eq!(resp.structured_prompt, Some(json!({"style": "noir"})));
        assert_eq!(resp.extra["content_moderated"], false);
        assert!(!resp.is_pending());
    }

    #[test]
    fn envelope_is_pending() {
        let resp: OperationResponse = serde_json::from_value(json!({
            "request_id": "r2",
            "status": "in_progress",
            "status_url": "https://api/status/r2"
        }))
        .unwrap();
        assert!(resp.is_pending());
        assert!(resp.structured_prompt.is_none());
    }

    #[test]
    fn unrecognized_status_reads_as_running() {
        let resp: OperationResponse =
            serde_json::from_value(json!({"request_id": "r3", "status": "warming_up"})).unwrap();
        assert_eq!(resp.status, OperationStatus::Running);
    }

    #[test]
    fn mistyped_fields_move_to_extra() {
        let resp: OperationResponse = serde_json::from_value(json!({
            "request_id": "r4",
            "status": "COMPLETED",
            "image_url": {"href": "https://cdn/x.png"},
            "seed": 12.0,
            "structured_prompt": null
        }))
        .unwrap();
        assert_eq!(resp.status, OperationStatus::Completed);
        assert_eq!(resp.seed, Some(12));
        assert_eq!(resp.image_url, None);
        assert_eq!(resp.extra["image_url"], json!({"href": "https://cdn/x.png"}));
        assert_eq!(resp.structured_prompt, None);

        let resp: OperationResponse =
            serde_json::from_value(json!({"seed": 1.5, "request_id": 77, "status_url": ["a"]}))
                .unwrap();
        assert_eq!(resp.seed, None);
        assert_eq!(resp.extra["seed"], 1.5);
        assert_eq!(resp.request_id, "77");
        assert_eq!(resp.status_url, None);
        assert_eq!(resp.extra["status_url"], json!(["a"]));
        assert_eq!(resp.status, OperationStatus::Pending);
        assert!(!resp.is_pending());
    }

    #[test]
    fn plain_text_prompt_stays_a_string() {
        assert_eq!(parse_json_string("noir".into()), json!("noir"));
    }

    #[test]
    fn lite_operations_use_lite_paths() {
        assert_eq!(Operation::image(Flavor::Lite).path(), "/image/generate/lite");
        assert_eq!(
            Operation::structured_prompt(Flavor::Standard).path(),
            "/structured_prompt/generate"
        );
    }
}
