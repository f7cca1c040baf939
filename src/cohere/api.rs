//! Wire shapes for the Cohere v2 Chat API.
//! <https://docs.cohere.com/reference/chat>

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<CohereTool>>,
    /// `REQUIRED` or `NONE`; absent means auto.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Native citation grounding; cited in responses by document id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Document>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System(SystemMessage),
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemMessage {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserMessage {
    pub content: Vec<UserContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AssistantMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<AssistantContent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text { text: String },
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolMessage {
    pub tool_call_id: String,
    pub content: Vec<ToolContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub function: Option<ToolCallFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolCallFunction {
    #[serde(default)]
    pub name: Option<String>,
    /// JSON-encoded arguments object.
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohereTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject {
        #[serde(skip_serializing_if = "Option::is_none")]
        json_schema: Option<Value>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ResponseMessage,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<Vec<AssistantContent>>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Usage {
    #[serde(default)]
    pub tokens: Option<TokenCounts>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TokenCounts {
    #[serde(default)]
    pub input_tokens: Option<f64>,
    #[serde(default)]
    pub output_tokens: Option<f64>,
}

/// Streaming events, keyed by the dashed `type` string.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "content-start")]
    ContentStart(ContentEvent),
    #[serde(rename = "content-delta")]
    ContentDelta(ContentEvent),
    #[serde(rename = "tool-call-start")]
    ToolCallStart(ToolCallEvent),
    #[serde(rename = "tool-call-delta")]
    ToolCallDelta(ToolCallEvent),
    #[serde(rename = "message-end")]
    MessageEnd(MessageEndEvent),
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentEvent {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub delta: Option<ContentEventDelta>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContentEventDelta {
    #[serde(default)]
    pub message: Option<ContentEventMessage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContentEventMessage {
    #[serde(default)]
    pub content: Option<ContentFragment>,
}

/// Either a text fragment or a thinking fragment.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContentFragment {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallEvent {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub delta: Option<ToolCallEventDelta>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolCallEventDelta {
    #[serde(default)]
    pub message: Option<ToolCallEventMessage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolCallEventMessage {
    #[serde(default)]
    pub tool_calls: Option<ToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEndEvent {
    #[serde(default)]
    pub delta: Option<MessageEndDelta>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MessageEndDelta {
    #[serde(default)]
    pub usage: Option<Usage>,
}
