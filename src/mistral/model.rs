use super::api;
use crate::{
    delta::infer_delta_index,
    flatten::flatten_source_parts,
    telemetry::{self, ModelTelemetry},
    transport, ContentDelta, LanguageModel, LanguageModelInput, Message, Modality, ModelError,
    ModelMetadata, ModelResponse, ModelResult, ModelStream, ModelUsage, Part, PartDelta,
    PartialModelResponse, ResponseFormatOption, Tool, ToolCallPart, ToolCallPartDelta,
    ToolChoiceOption,
};
use async_stream::try_stream;
use futures::StreamExt;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

const PROVIDER: &str = "mistral";
const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";

/// Mistral Chat Completions API. `top_k` has no wire equivalent and is
/// ignored.
pub struct MistralModel {
    model_id: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    metadata: Option<Arc<ModelMetadata>>,
    telemetry: Option<Arc<dyn ModelTelemetry>>,
}

#[derive(Clone, Default)]
pub struct MistralOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub client: Option<reqwest::Client>,
    pub telemetry: Option<Arc<dyn ModelTelemetry>>,
}

impl MistralModel {
    #[must_use]
    pub fn new(model_id: impl Into<String>, options: MistralOptions) -> Self {
        Self {
            model_id: model_id.into(),
            api_key: options.api_key,
            base_url: options
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: options.client.unwrap_or_default(),
            headers: options.headers.unwrap_or_default(),
            metadata: None,
            telemetry: options.telemetry,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = Some(Arc::new(metadata));
        self
    }

    fn request_headers(&self) -> ModelResult<reqwest::header::HeaderMap> {
        let auth = format!("Bearer {}", self.api_key);
        transport::build_headers(
            std::iter::once(("authorization", auth.as_str())).chain(
                self.headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            ),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn pricing(&self) -> Option<&crate::ModelPricing> {
        self.metadata.as_ref().and_then(|m| m.pricing.as_ref())
    }
}

#[async_trait::async_trait]
impl LanguageModel for MistralModel {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn model_id(&self) -> String {
        self.model_id.clone()
    }

    fn metadata(&self) -> Option<&ModelMetadata> {
        self.metadata.as_deref()
    }

    async fn generate(&self, input: LanguageModelInput) -> ModelResult<ModelResponse> {
        telemetry::observe_generate(
            self.telemetry.as_ref(),
            PROVIDER,
            &self.model_id,
            input,
            |input| async move {
                let payload = build_chat_request(&input, &self.model_id, false)?;
                let response: api::ChatCompletionResponse = transport::post_json(
                    &self.client,
                    &self.endpoint(),
                    &payload,
                    self.request_headers()?,
                )
                .await?;

                let choice = response.choices.into_iter().next().ok_or_else(|| {
                    ModelError::Invariant(PROVIDER, "response carried no choices".to_string())
                })?;

                let content = map_response_message(choice.message)?;
                let usage = response.usage.map(map_usage);
                let cost = match (&usage, self.pricing()) {
                    (Some(usage), Some(pricing)) => Some(usage.calculate_cost(pricing)),
                    _ => None,
                };

                Ok(ModelResponse {
                    content,
                    usage,
                    cost,
                })
            },
        )
        .await
    }

    async fn stream(&self, input: LanguageModelInput) -> ModelResult<ModelStream> {
        telemetry::observe_stream(
            self.telemetry.as_ref(),
            PROVIDER,
            &self.model_id,
            input,
            |input| async move {
                let payload = build_chat_request(&input, &self.model_id, true)?;
                let mut chunks = transport::post_sse::<_, api::ChatCompletionChunk>(
                    &self.client,
                    &self.endpoint(),
                    &payload,
                    self.request_headers()?,
                    PROVIDER,
                )
                .await?;

                let pricing = self.pricing().cloned();

                let stream = try_stream! {
                    let mut seen: Vec<ContentDelta> = Vec::new();

                    while let Some(chunk) = chunks.next().await {
                        let chunk = chunk?;

                        if let Some(choice) =
                            chunk.choices.unwrap_or_default().into_iter().next()
                        {
                            for delta in map_chunk_delta(choice.delta, &seen)? {
                                seen.push(delta.clone());
                                yield PartialModelResponse {
                                    delta: Some(delta),
                                    ..Default::default()
                                };
                            }
                        }

                        if let Some(usage) = chunk.usage {
                            let usage = map_usage(usage);
                            let cost = pricing
                                .as_ref()
                                .map(|pricing| usage.calculate_cost(pricing));
                            yield PartialModelResponse {
                                usage: Some(usage),
                                cost,
                                ..Default::default()
                            };
                        }
                    }
                };

                Ok(ModelStream::from_stream(stream))
            },
        )
        .await
    }
}

fn build_chat_request(
    input: &LanguageModelInput,
    model_id: &str,
    stream: bool,
) -> ModelResult<Value> {
    let modalities = input.modalities.as_deref().unwrap_or_default();
    if modalities.contains(&Modality::Audio) || modalities.contains(&Modality::Image) {
        return Err(ModelError::Unsupported(
            PROVIDER,
            "only text output can be produced".to_string(),
        ));
    }

    let request = api::ChatCompletionRequest {
        model: model_id.to_string(),
        messages: build_messages(&input.messages, input.system_prompt.clone())?,
        tools: input
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(build_tool).collect()),
        tool_choice: input.tool_choice.as_ref().map(build_tool_choice),
        response_format: input.response_format.as_ref().map(build_response_format),
        max_tokens: input.max_tokens,
        temperature: input.temperature,
        top_p: input.top_p,
        presence_penalty: input.presence_penalty,
        frequency_penalty: input.frequency_penalty,
        random_seed: input.seed,
        stream: stream.then_some(true),
    };

    transport::merge_extra(&request, input.extra.as_ref(), PROVIDER)
}

fn build_messages(
    messages: &[Message],
    system_prompt: Option<String>,
) -> ModelResult<Vec<api::ChatMessage>> {
    let mut out = Vec::new();

    if let Some(prompt) = system_prompt.filter(|prompt| !prompt.is_empty()) {
        out.push(api::ChatMessage::System(api::SystemMessage {
            content: prompt,
        }));
    }

    for message in messages {
        match message {
            Message::User(user) => {
                out.push(api::ChatMessage::User(build_user_message(&user.content)?));
            }
            Message::Assistant(assistant) => {
                out.push(api::ChatMessage::Assistant(build_assistant_message(
                    &assistant.content,
                )?));
            }
            Message::Tool(tool) => {
                for part in &tool.content {
                    let Part::ToolResult(result) = part else {
                        return Err(ModelError::InvalidInput(format!(
                            "tool messages may only carry tool-result parts, found {}",
                            part.kind()
                        )));
                    };
                    out.push(api::ChatMessage::Tool(build_tool_message(result)?));
                }
            }
        }
    }

    Ok(out)
}

fn build_user_message(content: &[Part]) -> ModelResult<api::UserMessage> {
    let mut chunks = Vec::new();
    for part in flatten_source_parts(content.to_vec()) {
        match part {
            Part::Text(text) => chunks.push(api::ContentChunk::Text { text: text.text }),
            Part::Image(image) => chunks.push(api::ContentChunk::ImageUrl {
                image_url: api::ImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, image.data),
                },
            }),
            Part::Audio(_) => {
                return Err(ModelError::Unsupported(
                    PROVIDER,
                    "audio input cannot be expressed".to_string(),
                ))
            }
            other => {
                return Err(ModelError::InvalidInput(format!(
                    "user messages cannot carry {} parts",
                    other.kind()
                )))
            }
        }
    }
    Ok(api::UserMessage { content: chunks })
}

fn build_assistant_message(content: &[Part]) -> ModelResult<api::AssistantMessage> {
    let mut chunks = Vec::new();
    let mut tool_calls = Vec::new();

    for part in flatten_source_parts(content.to_vec()) {
        match part {
            Part::Text(text) => chunks.push(api::ContentChunk::Text { text: text.text }),
            Part::ToolCall(tool_call) => tool_calls.push(build_tool_call(&tool_call)),
            other => {
                return Err(ModelError::Unsupported(
                    PROVIDER,
                    format!("assistant {} parts cannot be expressed", other.kind()),
                ))
            }
        }
    }

    Ok(api::AssistantMessage {
        content: (!chunks.is_empty()).then_some(chunks),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    })
}

fn build_tool_call(part: &ToolCallPart) -> api::ToolCall {
    api::ToolCall {
        id: Some(part.tool_call_id.clone()),
        function: api::FunctionCall {
            name: Some(part.tool_name.clone()),
            arguments: Some(Value::String(part.args.to_string())),
        },
        index: None,
    }
}

fn build_tool_message(result: &crate::ToolResultPart) -> ModelResult<api::ToolMessage> {
    let mut chunks = Vec::new();
    for part in flatten_source_parts(result.content.clone()) {
        match part {
            Part::Text(text) => chunks.push(api::ContentChunk::Text { text: text.text }),
            other => {
                return Err(ModelError::Unsupported(
                    PROVIDER,
                    format!("tool results may only carry text, found {}", other.kind()),
                ))
            }
        }
    }
    Ok(api::ToolMessage {
        content: chunks,
        tool_call_id: result.tool_call_id.clone(),
        name: Some(result.tool_name.clone()),
    })
}

fn build_tool(tool: &Tool) -> api::MistralTool {
    api::MistralTool {
        kind: "function".to_string(),
        function: api::FunctionDefinition {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            parameters: tool.parameters.clone(),
            strict: Some(true),
        },
    }
}

fn build_tool_choice(choice: &ToolChoiceOption) -> api::ToolChoice {
    match choice {
        ToolChoiceOption::Auto => api::ToolChoice::Mode("auto".to_string()),
        ToolChoiceOption::None => api::ToolChoice::Mode("none".to_string()),
        ToolChoiceOption::Required => api::ToolChoice::Mode("any".to_string()),
        ToolChoiceOption::Tool(tool) => api::ToolChoice::Named(api::NamedToolChoice {
            kind: "function".to_string(),
            function: api::NamedToolChoiceFunction {
                name: tool.tool_name.clone(),
            },
        }),
    }
}

fn build_response_format(format: &ResponseFormatOption) -> api::ResponseFormat {
    match format {
        ResponseFormatOption::Text => api::ResponseFormat::Text,
        ResponseFormatOption::Json(json) => match &json.schema {
            Some(schema) => api::ResponseFormat::JsonSchema {
                json_schema: api::JsonSchemaFormat {
                    name: json.name.clone(),
                    description: json.description.clone(),
                    schema: schema.clone(),
                    strict: true,
                },
            },
            None => api::ResponseFormat::JsonObject,
        },
    }
}

/// Response content is either a plain string or a list of typed chunks.
fn collect_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(chunks) => {
            let text = chunks
                .iter()
                .filter_map(|chunk| chunk.get("text").and_then(Value::as_str))
                .collect::<String>();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

fn map_response_message(message: api::ResponseMessage) -> ModelResult<Vec<Part>> {
    let mut parts = Vec::new();

    if let Some(text) = message.content.as_ref().and_then(collect_text) {
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
    }

    for tool_call in message.tool_calls.unwrap_or_default() {
        let id = tool_call.id.ok_or_else(|| {
            ModelError::Invariant(PROVIDER, "tool call carried no id".to_string())
        })?;
        let name = tool_call.function.name.ok_or_else(|| {
            ModelError::Invariant(PROVIDER, "tool call carried no name".to_string())
        })?;
        let args = parse_arguments(tool_call.function.arguments)?;
        parts.push(Part::tool_call(id, name, args));
    }

    Ok(parts)
}

/// Arguments arrive either JSON-encoded in a string or as a bare object.
fn parse_arguments(arguments: Option<Value>) -> ModelResult<Value> {
    match arguments {
        None => Ok(serde_json::json!({})),
        Some(Value::Object(map)) => Ok(Value::Object(map)),
        Some(Value::String(raw)) => {
            if raw.trim().is_empty() {
                return Ok(serde_json::json!({}));
            }
            serde_json::from_str(&raw).map_err(|e| {
                ModelError::Invariant(
                    PROVIDER,
                    format!("tool call arguments are not valid JSON: {e}"),
                )
            })
        }
        Some(other) => Err(ModelError::Invariant(
            PROVIDER,
            format!("unexpected tool call arguments shape: {other}"),
        )),
    }
}

fn map_chunk_delta(
    delta: api::ChunkDelta,
    seen: &[ContentDelta],
) -> ModelResult<Vec<ContentDelta>> {
    let mut out: Vec<ContentDelta> = Vec::new();

    if let Some(text) = delta.content.as_ref().and_then(collect_text) {
        if !text.is_empty() {
            let part = PartDelta::text(text);
            let combined: Vec<ContentDelta> = seen.iter().chain(out.iter()).cloned().collect();
            let index = infer_delta_index(&part, &combined, None);
            out.push(ContentDelta { index, part });
        }
    }

    for tool_call in delta.tool_calls.unwrap_or_default() {
        let arguments = match tool_call.function.arguments {
            Some(Value::String(raw)) => Some(raw),
            Some(Value::Object(map)) => Some(Value::Object(map).to_string()),
            _ => None,
        };
        let part = PartDelta::ToolCall(ToolCallPartDelta {
            tool_call_id: tool_call.id,
            tool_name: tool_call.function.name,
            args: arguments,
            id: None,
        });
        let combined: Vec<ContentDelta> = seen.iter().chain(out.iter()).cloned().collect();
        let index = infer_delta_index(
            &part,
            &combined,
            tool_call.index.map(|index| index as usize),
        );
        out.push(ContentDelta { index, part });
    }

    Ok(out)
}

fn map_usage(usage: api::Usage) -> ModelUsage {
    ModelUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_with(messages: Vec<Message>) -> LanguageModelInput {
        LanguageModelInput {
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn seed_maps_to_random_seed() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.seed = Some(7);
        let payload = build_chat_request(&input, "mistral-large-latest", false).unwrap();
        assert_eq!(payload["random_seed"], 7);
        assert!(payload.get("seed").is_none());
    }

    #[test]
    fn required_tool_choice_maps_to_any() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.tool_choice = Some(ToolChoiceOption::Required);
        let payload = build_chat_request(&input, "mistral-large-latest", false).unwrap();
        assert_eq!(payload["tool_choice"], "any");
    }

    #[test]
    fn reasoning_parts_are_unsupported() {
        let input = input_with(vec![Message::assistant([Part::reasoning("hm")])]);
        assert!(matches!(
            build_chat_request(&input, "mistral-large-latest", false),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn audio_input_is_unsupported() {
        let input = input_with(vec![Message::user([Part::audio(
            "AAA=",
            crate::AudioFormat::Wav,
        )])]);
        assert!(matches!(
            build_chat_request(&input, "mistral-large-latest", false),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn tool_results_carry_name_and_call_id() {
        let input = input_with(vec![Message::tool([Part::tool_result(
            "c1",
            "wx",
            vec![Part::text("{\"t\":70}")],
        )])]);
        let payload = build_chat_request(&input, "mistral-large-latest", false).unwrap();
        assert_eq!(
            payload["messages"][0],
            json!({
                "role": "tool",
                "tool_call_id": "c1",
                "name": "wx",
                "content": [{"type": "text", "text": "{\"t\":70}"}],
            })
        );
    }

    #[test]
    fn string_and_chunked_content_both_collect() {
        assert_eq!(collect_text(&json!("plain")), Some("plain".into()));
        assert_eq!(
            collect_text(&json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])),
            Some("ab".into())
        );
        assert_eq!(collect_text(&json!(null)), None);
    }

    #[test]
    fn object_arguments_are_accepted_directly() {
        let args = parse_arguments(Some(json!({"c": "NYC"}))).unwrap();
        assert_eq!(args, json!({"c": "NYC"}));
        let args = parse_arguments(Some(json!("{\"c\":\"SF\"}"))).unwrap();
        assert_eq!(args, json!({"c": "SF"}));
        assert_eq!(parse_arguments(None).unwrap(), json!({}));
    }

    #[test]
    fn chunked_tool_calls_use_their_index_hint() {
        let mut seen: Vec<ContentDelta> = Vec::new();
        let first = map_chunk_delta(
            api::ChunkDelta {
                content: Some(json!("Working on it.")),
                tool_calls: None,
            },
            &seen,
        )
        .unwrap();
        seen.extend(first);

        let second = map_chunk_delta(
            api::ChunkDelta {
                content: None,
                tool_calls: Some(vec![api::ToolCall {
                    id: Some("c1".into()),
                    function: api::FunctionCall {
                        name: Some("wx".into()),
                        arguments: Some(json!("{\"c\":\"NYC\"}")),
                    },
                    index: Some(0),
                }]),
            },
            &seen,
        )
        .unwrap();

        assert_eq!(second[0].index, 1);
    }
}
