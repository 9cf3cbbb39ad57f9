//! Turning resolved inputs into typed API requests.

use serde_json::{Map, Value};
use tracing::debug;

use fibo_core::api::{
    parse_json_string, ImageGenerateRequest, StructuredPromptRequest, ASPECT_RATIOS,
    DEFAULT_ASPECT_RATIO, DEFAULT_STEPS_NUM,
};
use fibo_core::catalog::{InputCombination, NodeKind};
use fibo_core::error::{FiboError, Result};

const PROMPT_KEYS: [&str; 3] = ["prompt", "images", "structured_prompt"];

/// Resolved inputs for one node, with typed accessors.
pub(crate) struct Inputs<'a> {
    node_id: &'a str,
    map: &'a Map<String, Value>,
}

/// Optional generation parameters shared by image-producing kinds.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GenerationOptions {
    pub aspect_ratio: String,
    pub steps_num: u32,
    pub seed: Option<i64>,
}

impl<'a> Inputs<'a> {
    pub fn new(node_id: &'a str, map: &'a Map<String, Value>) -> Self {
        Self { node_id, map }
    }

    fn invalid(&self, message: impl Into<String>) -> FiboError {
        FiboError::Validation {
            node_id: self.node_id.to_string(),
            message: message.into(),
        }
    }

    /// A key counts as supplied when present and not null.
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    pub fn text(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(format!("'{key}' must be a string, got {other}"))),
        }
    }

    pub fn required_text(&self, key: &str) -> Result<String> {
        self.text(key)?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.invalid(format!("Missing required input '{key}'")))
    }

    /// A single URL is accepted and wrapped into a list.
    pub fn images(&self) -> Result<Option<Vec<String>>> {
        let items = match self.get("images") {
            None => return Ok(None),
            Some(Value::String(s)) => return Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(self.invalid(format!("'images' must be a list of URLs, got {other}")))
            }
        };
        items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(format!("'images' entries must be strings, got {v}")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn structured_prompt(&self) -> Result<Option<Value>> {
        match self.get("structured_prompt") {
            None => Ok(None),
            Some(Value::Object(o)) => Ok(Some(Value::Object(o.clone()))),
            Some(Value::String(s)) => match parse_json_string(s.clone()) {
                obj @ Value::Object(_) => Ok(Some(obj)),
                _ => Err(self.invalid("'structured_prompt' must be a JSON object")),
            },
            Some(other) => Err(self.invalid(format!(
                "'structured_prompt' must be a JSON object, got {other}"
            ))),
        }
    }

    /// Pick the first accepted combination whose keys are all supplied.
    ///
    /// The kind's combinations are listed in priority order, so
    /// `structured_prompt+prompt` beats `images+prompt`, which beats the
    /// single-key forms. Supplied keys outside the chosen combination are
    /// dropped from the request.
    pub fn combination(&self, kind: NodeKind) -> Result<InputCombination> {
        let supplied: Vec<&str> = PROMPT_KEYS
            .into_iter()
            .filter(|k| self.get(k).is_some())
            .collect();

        let accepted = kind.spec().combinations;
        let Some(combo) = accepted
            .iter()
            .copied()
            .find(|combo| combo.iter().all(|k| supplied.contains(k)))
        else {
            let options: Vec<String> =
                accepted.iter().map(|c| format!("'{}'", c.join("+"))).collect();
            let got = if supplied.is_empty() {
                "none".to_string()
            } else {
                supplied.join("+")
            };
            return Err(self.invalid(format!(
                "No valid input combination provided (got {got}). Required one of: {}",
                options.join(", ")
            )));
        };

        let dropped: Vec<&str> = supplied
            .iter()
            .copied()
            .filter(|k| !combo.contains(k))
            .collect();
        if !dropped.is_empty() {
            debug!(
                node_id = self.node_id,
                used = %combo.join("+"),
                dropped = %dropped.join("+"),
                "Ignoring inputs outside the chosen combination"
            );
        }
        Ok(combo)
    }

    pub fn generation_options(&self) -> Result<GenerationOptions> {
        let aspect_ratio = self
            .text("aspect_ratio")?
            .unwrap_or_else(|| DEFAULT_ASPECT_RATIO.to_string());
        if !ASPECT_RATIOS.contains(&aspect_ratio.as_str()) {
            return Err(self.invalid(format!(
                "Unsupported aspect_ratio '{aspect_ratio}', expected one of {ASPECT_RATIOS:?}"
            )));
        }

        let steps_num = match self.get("steps_num") {
            None => DEFAULT_STEPS_NUM,
            Some(v) => v
                .as_u64()
                .filter(|n| (1..=100).contains(n))
                .map(|n| n as u32)
                .ok_or_else(|| self.invalid(format!("'steps_num' must be an integer in 1..=100, got {v}")))?,
        };

        let seed = match self.get("seed") {
            None => None,
            Some(v) => Some(
                v.as_i64()
                    .ok_or_else(|| self.invalid(format!("'seed' must be an integer, got {v}")))?,
            ),
        };

        Ok(GenerationOptions {
            aspect_ratio,
            steps_num,
            seed,
        })
    }

    pub fn image_request(&self, kind: NodeKind) -> Result<ImageGenerateRequest> {
        let combo = self.combination(kind)?;
        let options = self.generation_options()?;
        Ok(ImageGenerateRequest {
            prompt: self.pick(combo, "prompt", Self::text)?,
            images: self.pick(combo, "images", |s, _| s.images())?,
            structured_prompt: self.pick(combo, "structured_prompt", |s, _| s.structured_prompt())?,
            aspect_ratio: options.aspect_ratio,
            steps_num: options.steps_num,
            seed: options.seed,
        })
    }

    pub fn prompt_request(&self, kind: NodeKind) -> Result<StructuredPromptRequest> {
        let combo = self.combination(kind)?;
        Ok(StructuredPromptRequest {
            prompt: self.pick(combo, "prompt", Self::text)?,
            images: self.pick(combo, "images", |s, _| s.images())?,
            structured_prompt: self.pick(combo, "structured_prompt", |s, _| s.structured_prompt())?,
        })
    }

    fn pick<T>(
        &self,
        combo: InputCombination,
        key: &str,
        read: impl Fn(&Self, &str) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        if combo.contains(&key) {
            read(self, key)
        } else {
            Ok(None)
        }
    }
}
