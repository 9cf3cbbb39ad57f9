//! Input resolution: how values reach a node before it executes.
//!
//! Precedence, later sources overriding earlier ones:
//! 1. the node's static `config`
//! 2. outputs of upstream nodes, along incoming edges in definition order
//! 3. the run's global input parameters
//!
//! An edge with both handles copies `response[sourceHandle]` to
//! `inputs[targetHandle]`. Otherwise the [`default_bindings`] table for the
//! (source kind, target kind) pair decides what flows. Upstream nodes without
//! a recorded response contribute nothing.

use serde_json::{Map, Value};
use tracing::debug;

use fibo_core::catalog::{Family, NodeKind};
use fibo_core::run::ExecutionSnapshot;
use fibo_core::workflow::WorkflowNode;

use crate::graph::WorkflowGraph;

/// How a propagated value lands in the target's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Replace the target key.
    Set,
    /// Push onto the target's list, creating it if needed.
    Append,
}

/// One row of the default output mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub output: &'static str,
    pub input: &'static str,
    pub mode: BindMode,
}

const fn set(output: &'static str, input: &'static str) -> Binding {
    Binding { output, input, mode: BindMode::Set }
}

const fn append(output: &'static str, input: &'static str) -> Binding {
    Binding { output, input, mode: BindMode::Append }
}

const GENERATE_TO_GENERATE: &[Binding] = &[
    append("image_url", "images"),
    set("structured_prompt", "structured_prompt"),
];
const GENERATE_TO_PROMPT: &[Binding] = &[append("image_url", "images")];
const GENERATE_TO_REFINE: &[Binding] = &[set("image_url", "image_url")];
const PROMPT_TO_GENERATE: &[Binding] = &[set("structured_prompt", "structured_prompt")];
const REFINE_TO_GENERATE: &[Binding] = &[
    append("refined_image_url", "images"),
    set("refined_structured_prompt", "structured_prompt"),
];
const REFINE_TO_PROMPT: &[Binding] = &[append("refined_image_url", "images")];
const REFINE_TO_REFINE: &[Binding] = &[set("refined_image_url", "image_url")];

/// Default propagation for an edge without explicit handles.
///
/// Structured prompt → structured prompt and structured prompt → refine
/// carry nothing: the target either needs an image or would just receive
/// its own kind of output back.
pub fn default_bindings(source: NodeKind, target: NodeKind) -> &'static [Binding] {
    use Family::*;
    match (source.family(), target.family()) {
        (ImageGenerate, ImageGenerate) => GENERATE_TO_GENERATE,
        (ImageGenerate, StructuredPrompt) => GENERATE_TO_PROMPT,
        (ImageGenerate, ImageRefine) => GENERATE_TO_REFINE,
        (StructuredPrompt, ImageGenerate) => PROMPT_TO_GENERATE,
        (StructuredPrompt, StructuredPrompt) | (StructuredPrompt, ImageRefine) => &[],
        (ImageRefine, ImageGenerate) => REFINE_TO_GENERATE,
        (ImageRefine, StructuredPrompt) => REFINE_TO_PROMPT,
        (ImageRefine, ImageRefine) => REFINE_TO_REFINE,
    }
}

/// Compute the inputs for `node` from the snapshot's recorded state.
pub fn resolve_inputs(
    snapshot: &ExecutionSnapshot,
    node: &WorkflowNode,
    graph: &WorkflowGraph,
) -> Map<String, Value> {
    let mut inputs = node.config().clone();

    for edge in graph.incoming(&node.id) {
        let Some(response) = snapshot.response_of(&edge.source) else {
            debug!(
                node_id = %node.id,
                upstream = %edge.source,
                "Upstream node has no recorded response, skipping edge"
            );
            continue;
        };

        if let Some((output, input)) = edge.explicit_binding() {
            if let Some(value) = response.get(output) {
                inputs.insert(input.to_string(), value.clone());
            }
            continue;
        }

        let Some(source) = graph.node(&edge.source) else {
            continue;
        };
        let bindings = default_bindings(source.kind, node.kind);
        if bindings.is_empty() {
            debug!(
                edge_id = %edge.id,
                source_type = %source.kind,
                target_type = %node.kind,
                "No default mapping for node pair, nothing propagated"
            );
        }
        for binding in bindings {
            let Some(value) = response.get(binding.output) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            match binding.mode {
                BindMode::Set => {
                    inputs.insert(binding.input.to_string(), value.clone());
                }
                BindMode::Append => append_value(&mut inputs, binding.input, value.clone()),
            }
        }
    }

    for (key, value) in &snapshot.input_parameters {
        inputs.insert(key.clone(), value.clone());
    }

    inputs
}

fn append_value(inputs: &mut Map<String, Value>, key: &str, value: Value) {
    match inputs.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) if !existing.is_null() => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        _ => {
            inputs.insert(key.to_string(), Value::Array(vec![value]));
        }
    }
}
