use crate::{ContentDelta, Part};
use serde::{Deserialize, Serialize};

/// The complete response generated by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ModelUsage>,
    /// Estimated cost in dollars, present when the model carries pricing
    /// metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// One yield of a streaming call. Carries at most one content delta plus
/// any usage/cost increment reported alongside it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialModelResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ContentDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ModelUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Token counts reported by the provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<ModelTokensDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens_details: Option<ModelTokensDetails>,
}

/// Per-modality token breakdown. Providers report only the slices they
/// meter; everything else stays `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelTokensDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_text_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_audio_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_image_tokens: Option<u32>,
}

/// A capability a model is known to support, used by callers to route
/// requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelCapability {
    FunctionCalling,
    StructuredOutput,
    StructuredOutputStrict,
    AudioInput,
    AudioOutput,
    ImageInput,
    ImageOutput,
    Reasoning,
    Citation,
}

/// Per-token pricing in dollars, split by modality and cache status.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost_per_text_token: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost_per_cached_text_token: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cost_per_text_token: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost_per_audio_token: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost_per_cached_audio_token: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cost_per_audio_token: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost_per_image_token: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost_per_cached_image_token: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cost_per_image_token: Option<f64>,
}
