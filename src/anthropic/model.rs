use super::api;
use crate::{
    delta::part_to_delta,
    telemetry::{self, ModelTelemetry},
    transport, Citation, CitationDelta, ContentDelta, LanguageModel, LanguageModelInput, Message,
    ModelError, ModelMetadata, ModelResponse, ModelResult, ModelStream, ModelUsage, Part,
    PartDelta, PartialModelResponse, ReasoningOptions, ReasoningPart, ReasoningPartDelta,
    TextPart, TextPartDelta, Tool, ToolCallPartDelta, ToolChoiceOption, ToolResultPart,
};
use async_stream::try_stream;
use futures::StreamExt;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API. The penalty knobs, `seed`, and
/// `response_format` have no wire equivalent and are ignored.
pub struct AnthropicModel {
    model_id: String,
    api_key: String,
    base_url: String,
    api_version: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    metadata: Option<Arc<ModelMetadata>>,
    telemetry: Option<Arc<dyn ModelTelemetry>>,
}

#[derive(Clone, Default)]
pub struct AnthropicOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub client: Option<reqwest::Client>,
    pub telemetry: Option<Arc<dyn ModelTelemetry>>,
}

impl AnthropicModel {
    #[must_use]
    pub fn new(model_id: impl Into<String>, options: AnthropicOptions) -> Self {
        Self {
            model_id: model_id.into(),
            api_key: options.api_key,
            base_url: options
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_version: options
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
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
        transport::build_headers(
            [
                ("x-api-key", self.api_key.as_str()),
                ("anthropic-version", self.api_version.as_str()),
            ]
            .into_iter()
            .chain(
                self.headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            ),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn pricing(&self) -> Option<&crate::ModelPricing> {
        self.metadata.as_ref().and_then(|m| m.pricing.as_ref())
    }
}

#[async_trait::async_trait]
impl LanguageModel for AnthropicModel {
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
                let payload = build_message_params(&input, &self.model_id, false)?;
                let response: api::MessageResponse = transport::post_json(
                    &self.client,
                    &self.endpoint(),
                    &payload,
                    self.request_headers()?,
                )
                .await?;

                let content = map_content_blocks(response.content);
                let usage = Some(map_usage(&response.usage));
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
                let payload = build_message_params(&input, &self.model_id, true)?;
                let mut events = transport::post_sse::<_, api::StreamEvent>(
                    &self.client,
                    &self.endpoint(),
                    &payload,
                    self.request_headers()?,
                    PROVIDER,
                )
                .await?;

                let pricing = self.pricing().cloned();

                let stream = try_stream! {
                    while let Some(event) = events.next().await {
                        match event? {
                            api::StreamEvent::MessageStart(start) => {
                                let usage = map_usage(&start.message.usage);
                                let cost = pricing
                                    .as_ref()
                                    .map(|pricing| usage.calculate_cost(pricing));
                                yield PartialModelResponse {
                                    usage: Some(usage),
                                    cost,
                                    ..Default::default()
                                };
                            }
                            api::StreamEvent::MessageDelta(delta) => {
                                // input tokens were already reported on
                                // message_start
                                let usage = ModelUsage {
                                    input_tokens: 0,
                                    output_tokens: delta.usage.output_tokens,
                                    ..Default::default()
                                };
                                let cost = pricing
                                    .as_ref()
                                    .map(|pricing| usage.calculate_cost(pricing));
                                yield PartialModelResponse {
                                    usage: Some(usage),
                                    cost,
                                    ..Default::default()
                                };
                            }
                            api::StreamEvent::ContentBlockStart(start) => {
                                if let Some(delta) =
                                    map_block_start(start.content_block, start.index)?
                                {
                                    yield PartialModelResponse {
                                        delta: Some(delta),
                                        ..Default::default()
                                    };
                                }
                            }
                            api::StreamEvent::ContentBlockDelta(event) => {
                                if let Some(delta) = map_block_delta(event.delta, event.index) {
                                    yield PartialModelResponse {
                                        delta: Some(delta),
                                        ..Default::default()
                                    };
                                }
                            }
                            api::StreamEvent::Other => {}
                        }
                    }
                };

                Ok(ModelStream::from_stream(stream))
            },
        )
        .await
    }
}

fn build_message_params(
    input: &LanguageModelInput,
    model_id: &str,
    stream: bool,
) -> ModelResult<Value> {
    let max_tokens = input.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

    if let Some(modality) = requested_media_modality(input) {
        return Err(ModelError::Unsupported(
            PROVIDER,
            format!("{modality} output cannot be produced"),
        ));
    }

    // response_format is ignored: the Messages API has no JSON mode, and
    // tool forcing covers structured output.
    let params = api::CreateMessageParams {
        max_tokens,
        messages: build_messages(&input.messages)?,
        model: model_id.to_string(),
        stream: stream.then_some(true),
        system: input
            .system_prompt
            .clone()
            .filter(|prompt| !prompt.is_empty()),
        temperature: input.temperature,
        thinking: input
            .reasoning
            .as_ref()
            .map(|reasoning| build_thinking_config(reasoning, max_tokens)),
        tool_choice: input.tool_choice.as_ref().map(build_tool_choice),
        tools: input
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(build_tool).collect()),
        top_k: input.top_k,
        top_p: input.top_p,
    };

    transport::merge_extra(&params, input.extra.as_ref(), PROVIDER)
}

fn requested_media_modality(input: &LanguageModelInput) -> Option<&'static str> {
    let modalities = input.modalities.as_deref().unwrap_or_default();
    if modalities.contains(&crate::Modality::Audio) {
        Some("audio")
    } else if modalities.contains(&crate::Modality::Image) {
        Some("image")
    } else {
        None
    }
}

fn build_messages(messages: &[Message]) -> ModelResult<Vec<api::InputMessage>> {
    messages
        .iter()
        .map(|message| {
            let (role, content) = match message {
                Message::User(user) => (
                    "user",
                    user.content
                        .iter()
                        .map(build_user_content_block)
                        .collect::<ModelResult<Vec<_>>>()?,
                ),
                Message::Assistant(assistant) => (
                    "assistant",
                    assistant
                        .content
                        .iter()
                        .map(build_assistant_content_block)
                        .collect::<ModelResult<Vec<_>>>()?,
                ),
                // tool results travel back as user content blocks
                Message::Tool(tool) => {
                    for part in &tool.content {
                        if !matches!(part, Part::ToolResult(_)) {
                            return Err(ModelError::InvalidInput(format!(
                                "tool messages may only carry tool-result parts, found {}",
                                part.kind()
                            )));
                        }
                    }
                    (
                        "user",
                        tool.content
                            .iter()
                            .map(build_content_block)
                            .collect::<ModelResult<Vec<_>>>()?,
                    )
                }
            };
            Ok(api::InputMessage {
                role: role.to_string(),
                content,
            })
        })
        .collect()
}

fn build_user_content_block(part: &Part) -> ModelResult<api::InputContentBlock> {
    match part {
        Part::ToolCall(_) | Part::Reasoning(_) => Err(ModelError::InvalidInput(format!(
            "user messages cannot carry {} parts",
            part.kind()
        ))),
        other => build_content_block(other),
    }
}

fn build_assistant_content_block(part: &Part) -> ModelResult<api::InputContentBlock> {
    match part {
        Part::ToolResult(_) => Err(ModelError::Unsupported(
            PROVIDER,
            "assistant messages cannot carry tool-result parts".to_string(),
        )),
        other => build_content_block(other),
    }
}

fn build_content_block(part: &Part) -> ModelResult<api::InputContentBlock> {
    Ok(match part {
        Part::Text(text) => api::InputContentBlock::Text(api::TextBlock {
            text: text.text.clone(),
        }),
        Part::Image(image) => api::InputContentBlock::Image(api::ImageBlock {
            source: api::ImageSource::Base64 {
                media_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        }),
        Part::Reasoning(reasoning) => build_thinking_block(reasoning),
        Part::ToolCall(tool_call) => api::InputContentBlock::ToolUse(api::ToolUseBlock {
            id: tool_call.tool_call_id.clone(),
            name: tool_call.tool_name.clone(),
            input: normalize_args(&tool_call.args)?,
        }),
        Part::ToolResult(result) => api::InputContentBlock::ToolResult(build_tool_result(result)?),
        Part::Source(source) => api::InputContentBlock::SearchResult(build_search_result(source)?),
        Part::Audio(_) => {
            return Err(ModelError::Unsupported(
                PROVIDER,
                "audio parts cannot be expressed".to_string(),
            ))
        }
    })
}

fn build_thinking_block(reasoning: &ReasoningPart) -> api::InputContentBlock {
    if reasoning.is_redacted() {
        api::InputContentBlock::RedactedThinking(api::RedactedThinkingBlock {
            data: reasoning.signature.clone().unwrap_or_default(),
        })
    } else {
        api::InputContentBlock::Thinking(api::ThinkingBlock {
            thinking: reasoning.text.clone(),
            signature: reasoning.signature.clone().unwrap_or_default(),
        })
    }
}

fn build_tool_result(result: &ToolResultPart) -> ModelResult<api::ToolResultBlock> {
    let mut content = Vec::new();
    for part in &result.content {
        content.push(match part {
            Part::Text(text) => api::ToolResultContentBlock::Text(api::TextBlock {
                text: text.text.clone(),
            }),
            Part::Image(image) => api::ToolResultContentBlock::Image(api::ImageBlock {
                source: api::ImageSource::Base64 {
                    media_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            }),
            Part::Source(source) => {
                api::ToolResultContentBlock::SearchResult(build_search_result(source)?)
            }
            other => {
                return Err(ModelError::Unsupported(
                    PROVIDER,
                    format!("tool results cannot carry {} parts", other.kind()),
                ))
            }
        });
    }

    Ok(api::ToolResultBlock {
        tool_use_id: result.tool_call_id.clone(),
        content: if content.is_empty() {
            None
        } else {
            Some(content)
        },
        is_error: result.is_error,
    })
}

fn build_search_result(source: &crate::SourcePart) -> ModelResult<api::SearchResultBlock> {
    let content = source
        .content
        .iter()
        .map(|part| match part {
            Part::Text(text) => Ok(api::TextBlock {
                text: text.text.clone(),
            }),
            other => Err(ModelError::Unsupported(
                PROVIDER,
                format!("source parts may only carry text here, found {}", other.kind()),
            )),
        })
        .collect::<ModelResult<Vec<_>>>()?;

    Ok(api::SearchResultBlock {
        source: source.source.clone(),
        title: source.title.clone(),
        content,
        citations: api::CitationsConfig { enabled: true },
    })
}

fn normalize_args(args: &Value) -> ModelResult<Value> {
    match args {
        Value::Object(_) => Ok(args.clone()),
        Value::Null => Ok(Value::Object(serde_json::Map::new())),
        _ => Err(ModelError::InvalidInput(
            "tool call arguments must be a JSON object".to_string(),
        )),
    }
}

fn build_tool(tool: &Tool) -> api::AnthropicTool {
    api::AnthropicTool {
        name: tool.name.clone(),
        description: Some(tool.description.clone()),
        input_schema: tool.parameters.clone(),
    }
}

fn build_tool_choice(choice: &ToolChoiceOption) -> api::ToolChoice {
    match choice {
        ToolChoiceOption::Auto => api::ToolChoice::Auto,
        ToolChoiceOption::None => api::ToolChoice::None,
        ToolChoiceOption::Required => api::ToolChoice::Any,
        ToolChoiceOption::Tool(tool) => api::ToolChoice::Tool {
            name: tool.tool_name.clone(),
        },
    }
}

fn build_thinking_config(reasoning: &ReasoningOptions, max_tokens: u32) -> api::ThinkingConfig {
    if !reasoning.enabled {
        return api::ThinkingConfig::Disabled;
    }
    // thinking budget must leave room for at least one output token
    let fallback = max_tokens.saturating_sub(1).max(1);
    api::ThinkingConfig::Enabled {
        budget_tokens: reasoning.budget_tokens.map_or(fallback, |b| b.max(1)),
    }
}

fn map_content_blocks(blocks: Vec<api::ContentBlock>) -> Vec<Part> {
    blocks.into_iter().filter_map(map_content_block).collect()
}

fn map_content_block(block: api::ContentBlock) -> Option<Part> {
    match block {
        api::ContentBlock::Text(text) => {
            let citations = map_citations(text.citations);
            Some(Part::Text(TextPart {
                text: text.text,
                citations,
            }))
        }
        api::ContentBlock::Thinking(thinking) => Some(Part::Reasoning(ReasoningPart {
            text: thinking.thinking,
            signature: (!thinking.signature.is_empty()).then_some(thinking.signature),
            id: None,
        })),
        api::ContentBlock::RedactedThinking(redacted) => {
            Some(Part::Reasoning(ReasoningPart::redacted(redacted.data)))
        }
        api::ContentBlock::ToolUse(tool_use) => Some(Part::ToolCall(crate::ToolCallPart::new(
            tool_use.id,
            tool_use.name,
            tool_use.input,
        ))),
        api::ContentBlock::Other => None,
    }
}

fn map_citations(citations: Option<Vec<api::ResponseCitation>>) -> Option<Vec<Citation>> {
    let mapped: Vec<Citation> = citations?
        .into_iter()
        .filter_map(|citation| {
            let api::ResponseCitation::SearchResultLocation(location) = citation else {
                return None;
            };
            if location.source.is_empty() {
                return None;
            }
            Some(Citation {
                source: location.source,
                cited_text: (!location.cited_text.is_empty()).then_some(location.cited_text),
                start_index: location.start_block_index,
                end_index: location.end_block_index,
                title: location.title,
            })
        })
        .collect();

    (!mapped.is_empty()).then_some(mapped)
}

fn map_usage(usage: &api::Usage) -> ModelUsage {
    ModelUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        ..Default::default()
    }
}

fn map_block_start(
    block: api::ContentBlock,
    index: usize,
) -> ModelResult<Option<ContentDelta>> {
    let Some(part) = map_content_block(block) else {
        return Ok(None);
    };
    let mut delta = part_to_delta(part)?;
    if let PartDelta::ToolCall(tool_call) = &mut delta {
        // args stream separately as input_json deltas; whatever the start
        // event carried would double-count
        tool_call.args = Some(String::new());
    }
    Ok(Some(ContentDelta { index, part: delta }))
}

fn map_block_delta(delta: api::ContentBlockDelta, index: usize) -> Option<ContentDelta> {
    let part = match delta {
        api::ContentBlockDelta::TextDelta { text } => PartDelta::Text(TextPartDelta {
            text,
            citation: None,
        }),
        api::ContentBlockDelta::InputJsonDelta { partial_json } => {
            PartDelta::ToolCall(ToolCallPartDelta {
                args: Some(partial_json),
                ..Default::default()
            })
        }
        api::ContentBlockDelta::ThinkingDelta { thinking } => {
            PartDelta::Reasoning(ReasoningPartDelta {
                text: Some(thinking),
                ..Default::default()
            })
        }
        api::ContentBlockDelta::SignatureDelta { signature } => {
            PartDelta::Reasoning(ReasoningPartDelta {
                signature: Some(signature),
                ..Default::default()
            })
        }
        api::ContentBlockDelta::CitationsDelta { citation } => {
            let api::ResponseCitation::SearchResultLocation(location) = citation else {
                return None;
            };
            PartDelta::Text(TextPartDelta {
                text: String::new(),
                citation: Some(CitationDelta {
                    source: Some(location.source),
                    cited_text: (!location.cited_text.is_empty())
                        .then_some(location.cited_text),
                    start_index: Some(location.start_block_index),
                    end_index: Some(location.end_block_index),
                    title: location.title,
                }),
            })
        }
        api::ContentBlockDelta::Other => return None,
    };

    Some(ContentDelta { index, part })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PartialModelResponse, StreamAccumulator, ToolChoiceTool};
    use serde_json::json;

    fn input_with(messages: Vec<Message>) -> LanguageModelInput {
        LanguageModelInput {
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn system_prompt_is_a_dedicated_field() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.system_prompt = Some("Be terse.".into());
        let payload = build_message_params(&input, "claude-sonnet-4", false).unwrap();
        assert_eq!(payload["system"], "Be terse.");
        assert_eq!(payload["max_tokens"], json!(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn required_tool_choice_maps_to_any() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.tool_choice = Some(ToolChoiceOption::Required);
        let payload = build_message_params(&input, "claude-sonnet-4", false).unwrap();
        assert_eq!(payload["tool_choice"], json!({"type": "any"}));

        input.tool_choice = Some(ToolChoiceOption::Tool(ToolChoiceTool {
            tool_name: "wx".into(),
        }));
        let payload = build_message_params(&input, "claude-sonnet-4", false).unwrap();
        assert_eq!(payload["tool_choice"], json!({"type": "tool", "name": "wx"}));
    }

    #[test]
    fn thinking_budget_defaults_to_max_tokens_minus_one() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.max_tokens = Some(2000);
        input.reasoning = Some(ReasoningOptions::enabled());
        let payload = build_message_params(&input, "claude-sonnet-4", false).unwrap();
        assert_eq!(
            payload["thinking"],
            json!({"type": "enabled", "budget_tokens": 1999})
        );

        input.reasoning = Some(ReasoningOptions::default());
        let payload = build_message_params(&input, "claude-sonnet-4", false).unwrap();
        assert_eq!(payload["thinking"], json!({"type": "disabled"}));
    }

    #[test]
    fn redacted_reasoning_round_trips_as_redacted_thinking() {
        let input = input_with(vec![Message::assistant([Part::Reasoning(
            ReasoningPart::redacted("opaque"),
        )])]);
        let payload = build_message_params(&input, "claude-sonnet-4", false).unwrap();
        assert_eq!(
            payload["messages"][0]["content"][0],
            json!({"type": "redacted_thinking", "data": "opaque"})
        );
    }

    #[test]
    fn source_parts_become_native_search_results() {
        let input = input_with(vec![Message::user([Part::source(
            "https://example.com",
            "Example",
            vec![Part::text("evidence")],
        )])]);
        let payload = build_message_params(&input, "claude-sonnet-4", false).unwrap();
        assert_eq!(
            payload["messages"][0]["content"][0],
            json!({
                "type": "search_result",
                "source": "https://example.com",
                "title": "Example",
                "content": [{"type": "text", "text": "evidence"}],
                "citations": {"enabled": true},
            })
        );
    }

    #[test]
    fn audio_output_modality_is_unsupported() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.modalities = Some(vec![crate::Modality::Text, crate::Modality::Audio]);
        assert!(matches!(
            build_message_params(&input, "claude-sonnet-4", false),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn audio_parts_are_unsupported() {
        let input = input_with(vec![Message::user([Part::audio(
            "AAA=",
            crate::AudioFormat::Mp3,
        )])]);
        assert!(matches!(
            build_message_params(&input, "claude-sonnet-4", false),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn tool_calls_and_reasoning_in_user_messages_are_invalid() {
        let input = input_with(vec![Message::user([Part::tool_call(
            "c1",
            "wx",
            json!({}),
        )])]);
        assert!(matches!(
            build_message_params(&input, "claude-sonnet-4", false),
            Err(ModelError::InvalidInput(_))
        ));

        let input = input_with(vec![Message::user([Part::reasoning("hm")])]);
        assert!(matches!(
            build_message_params(&input, "claude-sonnet-4", false),
            Err(ModelError::InvalidInput(_))
        ));
    }

    #[test]
    fn tool_results_in_assistant_messages_are_unsupported() {
        let input = input_with(vec![Message::assistant([Part::tool_result(
            "c1",
            "wx",
            vec![Part::text("ok")],
        )])]);
        assert!(matches!(
            build_message_params(&input, "claude-sonnet-4", false),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn tool_message_routes_as_user_role() {
        let input = input_with(vec![Message::tool([Part::tool_result(
            "call_1",
            "wx",
            vec![Part::text("{\"t\":70}")],
        )])]);
        let payload = build_message_params(&input, "claude-sonnet-4", false).unwrap();
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(
            payload["messages"][0]["content"][0]["type"],
            "tool_result"
        );
    }

    #[test]
    fn tool_use_stream_starts_with_empty_args() {
        let start: api::StreamEvent = serde_json::from_value(json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": {
                "type": "tool_use",
                "id": "toolu_1",
                "name": "wx",
                "input": {},
            },
        }))
        .unwrap();

        let api::StreamEvent::ContentBlockStart(start) = start else {
            panic!("wrong event variant");
        };
        let delta = map_block_start(start.content_block, start.index)
            .unwrap()
            .unwrap();
        let PartDelta::ToolCall(tool_call) = delta.part else {
            panic!("expected tool call delta");
        };
        assert_eq!(tool_call.args.as_deref(), Some(""));
        assert_eq!(tool_call.tool_call_id.as_deref(), Some("toolu_1"));
    }

    #[test]
    fn thinking_stream_accumulates_text_then_signature() {
        let events = [
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": "", "signature": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Thinking "}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "hard."}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "S"}}),
        ];

        let mut acc = StreamAccumulator::new();
        for event in events {
            let event: api::StreamEvent = serde_json::from_value(event).unwrap();
            let delta = match event {
                api::StreamEvent::ContentBlockStart(start) => {
                    map_block_start(start.content_block, start.index).unwrap()
                }
                api::StreamEvent::ContentBlockDelta(event) => {
                    map_block_delta(event.delta, event.index)
                }
                _ => None,
            };
            if let Some(delta) = delta {
                acc.add_partial(&PartialModelResponse {
                    delta: Some(delta),
                    ..Default::default()
                })
                .unwrap();
            }
        }

        let response = acc.compute_response().unwrap();
        assert_eq!(
            response.content,
            vec![Part::Reasoning(
                ReasoningPart::new("Thinking hard.").with_signature("S")
            )]
        );
    }

    #[test]
    fn citation_deltas_ride_on_text_deltas() {
        let event: api::StreamEvent = serde_json::from_value(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {
                "type": "citations_delta",
                "citation": {
                    "type": "search_result_location",
                    "source": "doc-1",
                    "title": "Doc",
                    "cited_text": "quoted",
                    "start_block_index": 0,
                    "end_block_index": 1,
                    "search_result_index": 0,
                },
            },
        }))
        .unwrap();
        let api::StreamEvent::ContentBlockDelta(event) = event else {
            panic!("wrong event variant");
        };
        let delta = map_block_delta(event.delta, event.index).unwrap();
        let PartDelta::Text(text) = delta.part else {
            panic!("expected text delta");
        };
        assert_eq!(text.text, "");
        assert_eq!(text.citation.unwrap().source.as_deref(), Some("doc-1"));
    }

    #[test]
    fn message_delta_usage_reports_zero_input_tokens() {
        let event: api::StreamEvent = serde_json::from_value(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 42},
        }))
        .unwrap();
        let api::StreamEvent::MessageDelta(delta) = event else {
            panic!("wrong event variant");
        };
        assert_eq!(delta.usage.output_tokens, 42);
        assert_eq!(delta.usage.input_tokens, 0);
    }

    #[test]
    fn response_citations_map_onto_the_text_part() {
        let blocks = vec![api::ContentBlock::Text(api::ResponseTextBlock {
            text: "grounded".into(),
            citations: Some(vec![api::ResponseCitation::SearchResultLocation(
                api::SearchResultLocationCitation {
                    source: "doc-1".into(),
                    title: None,
                    cited_text: String::new(),
                    start_block_index: 0,
                    end_block_index: 1,
                },
            )]),
        })];
        let parts = map_content_blocks(blocks);
        let Part::Text(text) = &parts[0] else {
            panic!("expected text part");
        };
        let citations = text.citations.as_ref().unwrap();
        assert_eq!(citations[0].source, "doc-1");
        assert_eq!(citations[0].cited_text, None);
    }
}
