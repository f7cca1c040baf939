//! Wire shapes for the Anthropic Messages API.
//! <https://docs.anthropic.com/en/api/messages>

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateMessageParams {
    pub max_tokens: u32,
    pub messages: Vec<InputMessage>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputMessage {
    pub role: String,
    pub content: Vec<InputContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    Thinking(ThinkingBlock),
    RedactedThinking(RedactedThinkingBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    SearchResult(SearchResultBlock),
}

#[derive(Debug, Clone, Serialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageBlock {
    pub source: ImageSource,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ThinkingBlock {
    pub thinking: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedactedThinkingBlock {
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    /// Always a JSON object.
    pub input: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ToolResultContentBlock>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    SearchResult(SearchResultBlock),
}

/// The native citation container: inner text blocks become citable with
/// `citations.enabled`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultBlock {
    pub source: String,
    pub title: String,
    pub content: Vec<TextBlock>,
    pub citations: CitationsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitationsConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThinkingConfig {
    Enabled { budget_tokens: u32 },
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Any,
    Tool { name: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(ResponseTextBlock),
    Thinking(ResponseThinkingBlock),
    RedactedThinking(ResponseRedactedThinkingBlock),
    ToolUse(ResponseToolUseBlock),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseTextBlock {
    pub text: String,
    #[serde(default)]
    pub citations: Option<Vec<ResponseCitation>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseThinkingBlock {
    pub thinking: String,
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseRedactedThinkingBlock {
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseCitation {
    SearchResultLocation(SearchResultLocationCitation),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResultLocationCitation {
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub cited_text: String,
    pub start_block_index: usize,
    pub end_block_index: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart(MessageStartEvent),
    ContentBlockStart(ContentBlockStartEvent),
    ContentBlockDelta(ContentBlockDeltaEvent),
    MessageDelta(MessageDeltaEvent),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartEvent {
    pub message: MessageStart,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStart {
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStartEvent {
    pub index: usize,
    pub content_block: ContentBlock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockDeltaEvent {
    pub index: usize,
    pub delta: ContentBlockDelta,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    CitationsDelta { citation: ResponseCitation },
    #[serde(other)]
    Other,
}

/// Incremental usage; `input_tokens` is absent on deltas.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaEvent {
    pub usage: Usage,
}
