use crate::{Message, ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type JsonSchema = Value;

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema describing the arguments object.
    pub parameters: JsonSchema,
}

impl Tool {
    /// # Errors
    /// Returns `InvalidInput` when the name is empty, longer than 64
    /// characters, or contains characters outside `[A-Za-z0-9_.\-]`
    /// (the first character must be a letter or underscore).
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: JsonSchema,
    ) -> ModelResult<Self> {
        let name = name.into();
        if !is_valid_tool_name(&name) {
            return Err(ModelError::InvalidInput(format!(
                "invalid tool name {name:?}: expected ^[A-Za-z_][A-Za-z0-9_.\\-]{{0,63}}$"
            )));
        }
        Ok(Self {
            name,
            description: description.into(),
            parameters,
        })
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Determines how the model may choose which tool to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoiceOption {
    /// The model decides whether and which tool to call.
    Auto,
    /// The model must not call tools.
    None,
    /// The model must call at least one tool.
    Required,
    /// The model must call the named tool.
    Tool(ToolChoiceTool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoiceTool {
    pub tool_name: String,
}

/// The format the model must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseFormatOption {
    Text,
    Json(ResponseFormatJson),
}

/// JSON output, optionally constrained by a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormatJson {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<JsonSchema>,
}

/// An output channel the caller wants populated. Text is always implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Audio,
}

/// Options for audio output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<crate::AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Options for vendor "thinking" output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReasoningOptions {
    pub enabled: bool,
    /// Token budget for reasoning. Providers that expose discrete effort
    /// levels instead of budgets accept only their sentinel values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

impl ReasoningOptions {
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            budget_tokens: None,
        }
    }

    #[must_use]
    pub fn with_budget(mut self, budget_tokens: u32) -> Self {
        self.budget_tokens = Some(budget_tokens);
        self
    }
}

/// The input parameters for a model call, shared by `generate` and
/// `stream`. Unset knobs are omitted from the wire request; knobs a
/// provider does not support are ignored silently.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LanguageModelInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoiceOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormatOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
    /// Provider pass-through: merged verbatim into the serialized request
    /// object, on top of whatever the adapter produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_name_shape_is_enforced() {
        assert!(Tool::new("get_weather", "", json!({})).is_ok());
        assert!(Tool::new("_private.v2-beta", "", json!({})).is_ok());
        assert!(Tool::new("", "", json!({})).is_err());
        assert!(Tool::new("9lives", "", json!({})).is_err());
        assert!(Tool::new("has space", "", json!({})).is_err());
        assert!(Tool::new("a".repeat(65), "", json!({})).is_err());
        assert!(Tool::new("a".repeat(64), "", json!({})).is_ok());
    }
}
