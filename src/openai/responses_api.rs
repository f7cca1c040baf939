//! Wire shapes for the OpenAI Responses API.
//! <https://platform.openai.com/docs/api-reference/responses>

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseCreateParams {
    /// Extra output to include; `reasoning.encrypted_content` makes
    /// reasoning items round-trippable when `store` is off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Vec<InputItem>>,
    /// The system (or developer) message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// Input items, keyed by the `type` string. The `message` shape covers
/// both fresh user input and reflected assistant output; the vendor
/// tells them apart by role and content type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message(InputMessage),
    Reasoning(ReasoningItem),
    FunctionCall(FunctionCallItem),
    FunctionCallOutput(FunctionCallOutputItem),
    ImageGenerationCall(ImageGenerationCallItem),
}

#[derive(Debug, Clone, Serialize)]
pub struct InputMessage {
    /// Required when reflecting prior assistant output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    pub content: Vec<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    InputText {
        text: String,
    },
    InputImage {
        image_url: String,
        detail: String,
    },
    InputAudio {
        input_audio: InputAudioData,
    },
    OutputText {
        text: String,
        annotations: Vec<Value>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudioData {
    pub data: String,
    /// `wav` or `mp3` only.
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningItem {
    pub id: String,
    pub summary: Vec<SummaryText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryText {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallItem {
    /// JSON-encoded arguments object.
    pub arguments: String,
    pub call_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionCallOutputItem {
    pub call_id: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationCallItem {
    pub id: String,
    pub status: String,
    /// Base64 image payload or data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

fn default_output_format() -> String {
    "png".to_string()
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ReasoningParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextConfig {
    pub format: TextFormat,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextFormat {
    Text,
    JsonObject,
    JsonSchema {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        schema: Value,
        strict: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesTool {
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        parameters: Value,
        strict: bool,
    },
    ImageGeneration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: Option<ResponseUsage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message(OutputMessage),
    FunctionCall(FunctionCallItem),
    Reasoning(ReasoningItem),
    ImageGenerationCall(ImageGenerationCallItem),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputMessage {
    pub content: Vec<OutputContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Streaming events, keyed by the event `type` string. Events this
/// library does not consume deserialize into `Ignored`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded(OutputItemAddedEvent),
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta(OutputIndexedDelta),
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta(OutputIndexedDelta),
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta(OutputIndexedDelta),
    #[serde(rename = "response.refusal.delta")]
    RefusalDelta(OutputIndexedDelta),
    #[serde(rename = "response.image_generation_call.partial_image")]
    PartialImage(PartialImageEvent),
    #[serde(rename = "response.completed")]
    Completed(CompletedEvent),
    #[serde(rename = "response.failed")]
    Failed(FailedEvent),
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputItemAddedEvent {
    pub output_index: usize,
    pub item: OutputItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputIndexedDelta {
    pub output_index: usize,
    pub delta: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialImageEvent {
    pub output_index: usize,
    pub item_id: String,
    pub partial_image_b64: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletedEvent {
    pub response: CompletedResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletedResponse {
    #[serde(default)]
    pub usage: Option<ResponseUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailedEvent {
    #[serde(default)]
    pub response: Option<Value>,
}
