//! Node type catalogue.
//!
//! The set of node kinds is closed: every kind has a static [`NodeSpec`]
//! describing its endpoints, its input/output handles, the input
//! combinations it accepts, and whether it is approval-gated or two-step.
//! Both the data-flow default mapping and the executor dispatch key off
//! [`NodeKind`], so adding a kind means extending the exhaustive matches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FiboError;

/// Catalogue revision recorded into every execution snapshot.
pub const CATALOG_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    ImageGenerateV2,
    ImageGenerateLiteV2,
    StructuredPromptGenerateV2,
    StructuredPromptGenerateLiteV2,
    ImageRefineV2,
    ImageRefineLiteV2,
}

/// Endpoint flavor: the full model or the lightweight one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Standard,
    Lite,
}

/// How the executor drives a node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// One generation call.
    SingleStep,
    /// Structured prompt generation that suspends the run for human approval.
    ApprovalGated,
    /// Prompt extraction from an image followed by a generation call.
    TwoStep,
}

/// Broad family of a node kind, used for default data-flow mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    ImageGenerate,
    StructuredPrompt,
    ImageRefine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    ComingSoon,
}

/// A set of prompt-style inputs that may be supplied together.
pub type InputCombination = &'static [&'static str];

/// Static description of one node kind.
#[derive(Debug)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub title: &'static str,
    pub description: &'static str,
    pub endpoints: &'static [&'static str],
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    /// Accepted combinations of `prompt`/`images`/`structured_prompt`.
    /// Empty for kinds with fixed required inputs.
    pub combinations: &'static [InputCombination],
    /// Inputs that must always be present.
    pub required: &'static [&'static str],
    pub behavior: Behavior,
    pub availability: Availability,
}

const GENERATE_INPUTS: &[&str] = &[
    "prompt",
    "images",
    "structured_prompt",
    "aspect_ratio",
    "steps_num",
    "seed",
];
const GENERATE_OUTPUTS: &[&str] = &["image_url", "structured_prompt", "seed"];
const GENERATE_COMBINATIONS: &[InputCombination] = &[
    &["structured_prompt", "prompt"],
    &["images", "prompt"],
    &["prompt"],
    &["images"],
    &["structured_prompt"],
];

const PROMPT_INPUTS: &[&str] = &["prompt", "images", "structured_prompt"];
const PROMPT_OUTPUTS: &[&str] = &["structured_prompt"];
const PROMPT_COMBINATIONS: &[InputCombination] = &[
    &["structured_prompt", "prompt"],
    &["images", "prompt"],
    &["prompt"],
    &["images"],
];

const REFINE_INPUTS: &[&str] = &[
    "image_url",
    "refinement_prompt",
    "aspect_ratio",
    "steps_num",
    "seed",
];
const REFINE_OUTPUTS: &[&str] = &[
    "refined_image_url",
    "refined_structured_prompt",
    "original_image_url",
    "original_structured_prompt",
    "seed",
];
const REFINE_REQUIRED: &[&str] = &["image_url", "refinement_prompt"];

static CATALOG: [NodeSpec; 6] = [
    NodeSpec {
        kind: NodeKind::ImageGenerateV2,
        title: "Image Generate",
        description: "Generate an image from a prompt, reference images, or a structured prompt",
        endpoints: &["/image/generate"],
        inputs: GENERATE_INPUTS,
        outputs: GENERATE_OUTPUTS,
        combinations: GENERATE_COMBINATIONS,
        required: &[],
        behavior: Behavior::SingleStep,
        availability: Availability::Available,
    },
    NodeSpec {
        kind: NodeKind::ImageGenerateLiteV2,
        title: "Image Generate Lite",
        description: "Fast image generation on the lightweight model",
        endpoints: &["/image/generate/lite"],
        inputs: GENERATE_INPUTS,
        outputs: GENERATE_OUTPUTS,
        combinations: GENERATE_COMBINATIONS,
        required: &[],
        behavior: Behavior::SingleStep,
        availability: Availability::ComingSoon,
    },
    NodeSpec {
        kind: NodeKind::StructuredPromptGenerateV2,
        title: "Structured Prompt Generate",
        description: "Produce an editable structured prompt, then wait for approval",
        endpoints: &["/structured_prompt/generate"],
        inputs: PROMPT_INPUTS,
        outputs: PROMPT_OUTPUTS,
        combinations: PROMPT_COMBINATIONS,
        required: &[],
        behavior: Behavior::ApprovalGated,
        availability: Availability::Available,
    },
    NodeSpec {
        kind: NodeKind::StructuredPromptGenerateLiteV2,
        title: "Structured Prompt Generate Lite",
        description: "Structured prompt generation on the lightweight model",
        endpoints: &["/structured_prompt/generate/lite"],
        inputs: PROMPT_INPUTS,
        outputs: PROMPT_OUTPUTS,
        combinations: PROMPT_COMBINATIONS,
        required: &[],
        behavior: Behavior::ApprovalGated,
        availability: Availability::ComingSoon,
    },
    NodeSpec {
        kind: NodeKind::ImageRefineV2,
        title: "Image Refine",
        description: "Extract a structured prompt from an image and regenerate it with a refinement",
        endpoints: &["/structured_prompt/generate", "/image/generate"],
        inputs: REFINE_INPUTS,
        outputs: REFINE_OUTPUTS,
        combinations: &[],
        required: REFINE_REQUIRED,
        behavior: Behavior::TwoStep,
        availability: Availability::Available,
    },
    NodeSpec {
        kind: NodeKind::ImageRefineLiteV2,
        title: "Image Refine Lite",
        description: "Two-step refinement on the lightweight model",
        endpoints: &["/structured_prompt/generate/lite", "/image/generate/lite"],
        inputs: REFINE_INPUTS,
        outputs: REFINE_OUTPUTS,
        combinations: &[],
        required: REFINE_REQUIRED,
        behavior: Behavior::TwoStep,
        availability: Availability::ComingSoon,
    },
];

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::ImageGenerateV2,
        NodeKind::ImageGenerateLiteV2,
        NodeKind::StructuredPromptGenerateV2,
        NodeKind::StructuredPromptGenerateLiteV2,
        NodeKind::ImageRefineV2,
        NodeKind::ImageRefineLiteV2,
    ];

    pub fn spec(self) -> &'static NodeSpec {
        let idx = match self {
            NodeKind::ImageGenerateV2 => 0,
            NodeKind::ImageGenerateLiteV2 => 1,
            NodeKind::StructuredPromptGenerateV2 => 2,
            NodeKind::StructuredPromptGenerateLiteV2 => 3,
            NodeKind::ImageRefineV2 => 4,
            NodeKind::ImageRefineLiteV2 => 5,
        };
        &CATALOG[idx]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::ImageGenerateV2 => "ImageGenerateV2",
            NodeKind::ImageGenerateLiteV2 => "ImageGenerateLiteV2",
            NodeKind::StructuredPromptGenerateV2 => "StructuredPromptGenerateV2",
            NodeKind::StructuredPromptGenerateLiteV2 => "StructuredPromptGenerateLiteV2",
            NodeKind::ImageRefineV2 => "ImageRefineV2",
            NodeKind::ImageRefineLiteV2 => "ImageRefineLiteV2",
        }
    }

    pub fn family(self) -> Family {
        match self {
            NodeKind::ImageGenerateV2 | NodeKind::ImageGenerateLiteV2 => Family::ImageGenerate,
            NodeKind::StructuredPromptGenerateV2 | NodeKind::StructuredPromptGenerateLiteV2 => {
                Family::StructuredPrompt
            }
            NodeKind::ImageRefineV2 | NodeKind::ImageRefineLiteV2 => Family::ImageRefine,
        }
    }

    pub fn flavor(self) -> Flavor {
        match self {
            NodeKind::ImageGenerateLiteV2
            | NodeKind::StructuredPromptGenerateLiteV2
            | NodeKind::ImageRefineLiteV2 => Flavor::Lite,
            _ => Flavor::Standard,
        }
    }

    pub fn behavior(self) -> Behavior {
        self.spec().behavior
    }

    pub fn is_approval_gated(self) -> bool {
        self.behavior() == Behavior::ApprovalGated
    }

    pub fn accepts_input(self, key: &str) -> bool {
        self.spec().inputs.contains(&key)
    }

    pub fn produces_output(self, key: &str) -> bool {
        self.spec().outputs.contains(&key)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = FiboError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| FiboError::InvalidWorkflow(format!("Unknown node type: {s}")))
    }
}

/// All catalogue entries in declaration order.
pub fn catalog() -> &'static [NodeSpec] {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lookup_matches_kind() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.spec().kind, kind);
        }
    }

    #[test]
    fn serde_uses_type_names() {
        let json = serde_json::to_string(&NodeKind::StructuredPromptGenerateLiteV2).unwrap();
        assert_eq!(json, "\"StructuredPromptGenerateLiteV2\"");
        let kind: NodeKind = serde_json::from_str("\"ImageRefineV2\"").unwrap();
        assert_eq!(kind, NodeKind::ImageRefineV2);
        assert!(serde_json::from_str::<NodeKind>("\"GenerateImage\"").is_err());
    }

    #[test]
    fn from_str_round_trips_names() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        assert!("Upscale".parse::<NodeKind>().is_err());
    }

    #[test]
    fn only_structured_prompt_kinds_are_gated() {
        let gated: Vec<_> = NodeKind::ALL
            .into_iter()
            .filter(|k| k.is_approval_gated())
            .collect();
        assert_eq!(
            gated,
            vec![
                NodeKind::StructuredPromptGenerateV2,
                NodeKind::StructuredPromptGenerateLiteV2
            ]
        );
    }

    #[test]
    fn refine_requires_image_and_instruction() {
        let spec = NodeKind::ImageRefineLiteV2.spec();
        assert_eq!(spec.behavior, Behavior::TwoStep);
        assert_eq!(spec.required, &["image_url", "refinement_prompt"]);
        assert_eq!(NodeKind::ImageRefineLiteV2.flavor(), Flavor::Lite);
    }

    #[test]
    fn structured_prompt_alone_only_valid_for_image_generation() {
        let sp_only: &[&str] = &["structured_prompt"];
        assert!(NodeKind::ImageGenerateV2.spec().combinations.contains(&sp_only));
        assert!(!NodeKind::StructuredPromptGenerateV2
            .spec()
            .combinations
            .contains(&sp_only));
    }
}
