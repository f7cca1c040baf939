use super::api;
use crate::{
    delta::infer_delta_index,
    flatten::flatten_source_parts,
    telemetry::{self, ModelTelemetry},
    transport, ContentDelta, LanguageModel, LanguageModelInput, Message, Modality, ModelError,
    ModelMetadata, ModelResponse, ModelResult, ModelStream, ModelUsage, Part, PartDelta,
    PartialModelResponse, ReasoningPart, ReasoningPartDelta, ResponseFormatOption, TextPartDelta,
    Tool, ToolCallPartDelta, ToolChoiceOption,
};
use async_stream::try_stream;
use futures::StreamExt;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};

const PROVIDER: &str = "cohere";
const DEFAULT_BASE_URL: &str = "https://api.cohere.com";

/// Cohere v2 Chat API. Source parts map to the native `documents`
/// grounding field rather than being flattened.
pub struct CohereModel {
    model_id: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    metadata: Option<Arc<ModelMetadata>>,
    telemetry: Option<Arc<dyn ModelTelemetry>>,
}

#[derive(Clone, Default)]
pub struct CohereOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub client: Option<reqwest::Client>,
    pub telemetry: Option<Arc<dyn ModelTelemetry>>,
}

impl CohereModel {
    #[must_use]
    pub fn new(model_id: impl Into<String>, options: CohereOptions) -> Self {
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
        format!("{}/v2/chat", self.base_url)
    }

    fn pricing(&self) -> Option<&crate::ModelPricing> {
        self.metadata.as_ref().and_then(|m| m.pricing.as_ref())
    }
}

#[async_trait::async_trait]
impl LanguageModel for CohereModel {
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
                let response: api::ChatResponse = transport::post_json(
                    &self.client,
                    &self.endpoint(),
                    &payload,
                    self.request_headers()?,
                )
                .await?;

                let content = map_response_message(response.message)?;
                let usage = response.usage.as_ref().and_then(map_usage);
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
                    let mut seen: Vec<ContentDelta> = Vec::new();
                    // provider content index -> canonical index
                    let mut content_slots: HashMap<usize, usize> = HashMap::new();

                    while let Some(event) = events.next().await {
                        let mapped = match event? {
                            api::StreamEvent::ContentStart(event)
                            | api::StreamEvent::ContentDelta(event) => {
                                map_content_event(&event, &seen, &mut content_slots)
                            }
                            api::StreamEvent::ToolCallStart(event)
                            | api::StreamEvent::ToolCallDelta(event) => {
                                map_tool_call_event(&event, &seen)
                            }
                            api::StreamEvent::MessageEnd(end) => {
                                let usage = end
                                    .delta
                                    .and_then(|delta| delta.usage)
                                    .as_ref()
                                    .and_then(map_usage);
                                if let Some(usage) = usage {
                                    let cost = pricing
                                        .as_ref()
                                        .map(|pricing| usage.calculate_cost(pricing));
                                    yield PartialModelResponse {
                                        usage: Some(usage),
                                        cost,
                                        ..Default::default()
                                    };
                                }
                                None
                            }
                            api::StreamEvent::Ignored => None,
                        };

                        if let Some(delta) = mapped {
                            seen.push(delta.clone());
                            yield PartialModelResponse {
                                delta: Some(delta),
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
) -> ModelResult<serde_json::Value> {
    let modalities = input.modalities.as_deref().unwrap_or_default();
    if modalities.contains(&Modality::Audio) || modalities.contains(&Modality::Image) {
        return Err(ModelError::Unsupported(
            PROVIDER,
            "only text output can be produced".to_string(),
        ));
    }

    let mut documents = Vec::new();
    let messages = build_messages(&input.messages, input.system_prompt.clone(), &mut documents)?;

    let request = api::ChatRequest {
        model: model_id.to_string(),
        messages,
        tools: input.tools.as_ref().map(|tools| {
            tools.iter().map(build_tool).collect()
        }),
        tool_choice: input
            .tool_choice
            .as_ref()
            .map(build_tool_choice)
            .transpose()?
            .flatten(),
        documents: (!documents.is_empty()).then_some(documents),
        response_format: input.response_format.as_ref().map(build_response_format),
        max_tokens: input.max_tokens,
        temperature: input.temperature,
        p: input.top_p,
        k: input.top_k,
        seed: input.seed,
        frequency_penalty: input.frequency_penalty,
        presence_penalty: input.presence_penalty,
        stream: stream.then_some(true),
    };

    transport::merge_extra(&request, input.extra.as_ref(), PROVIDER)
}

fn build_messages(
    messages: &[Message],
    system_prompt: Option<String>,
    documents: &mut Vec<api::Document>,
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
                out.push(api::ChatMessage::User(build_user_message(
                    &user.content,
                    documents,
                )?));
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

fn build_user_message(
    content: &[Part],
    documents: &mut Vec<api::Document>,
) -> ModelResult<api::UserMessage> {
    let mut parts = Vec::new();
    for part in content {
        match part {
            Part::Text(text) => parts.push(api::UserContent::Text {
                text: text.text.clone(),
            }),
            Part::Image(image) => parts.push(api::UserContent::ImageUrl {
                image_url: api::ImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, image.data),
                },
            }),
            Part::Source(source) => documents.push(build_document(source)),
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
    Ok(api::UserMessage { content: parts })
}

/// Source parts are hoisted out of the message into the request-level
/// grounding documents.
fn build_document(source: &crate::SourcePart) -> api::Document {
    let snippet = source
        .content
        .iter()
        .filter_map(|part| part.as_text().map(|text| text.text.clone()))
        .collect::<Vec<_>>()
        .join("\n");
    api::Document {
        id: Some(source.source.clone()),
        data: json!({"title": source.title, "snippet": snippet}),
    }
}

fn build_assistant_message(content: &[Part]) -> ModelResult<api::AssistantMessage> {
    let mut blocks = Vec::new();
    let mut tool_calls = Vec::new();

    // reflected assistant turns have no grounding slot; surface source
    // evidence inline
    for part in &flatten_source_parts(content.to_vec()) {
        match part {
            Part::Text(text) => blocks.push(api::AssistantContent::Text {
                text: text.text.clone(),
            }),
            Part::Reasoning(reasoning) => blocks.push(api::AssistantContent::Thinking {
                thinking: reasoning.text.clone(),
            }),
            Part::ToolCall(tool_call) => tool_calls.push(api::ToolCall {
                id: Some(tool_call.tool_call_id.clone()),
                kind: Some("function".to_string()),
                function: Some(api::ToolCallFunction {
                    name: Some(tool_call.tool_name.clone()),
                    arguments: Some(tool_call.args.to_string()),
                }),
            }),
            other => {
                return Err(ModelError::Unsupported(
                    PROVIDER,
                    format!("assistant {} parts cannot be expressed", other.kind()),
                ))
            }
        }
    }

    Ok(api::AssistantMessage {
        content: (!blocks.is_empty()).then_some(blocks),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    })
}

fn build_tool_message(result: &crate::ToolResultPart) -> ModelResult<api::ToolMessage> {
    let mut content = Vec::new();
    for part in flatten_source_parts(result.content.clone()) {
        match part {
            Part::Text(text) => content.push(api::ToolContent::Text { text: text.text }),
            other => {
                return Err(ModelError::Unsupported(
                    PROVIDER,
                    format!("tool results may only carry text, found {}", other.kind()),
                ))
            }
        }
    }
    Ok(api::ToolMessage {
        tool_call_id: result.tool_call_id.clone(),
        content,
    })
}

fn build_tool(tool: &Tool) -> api::CohereTool {
    api::CohereTool {
        kind: "function".to_string(),
        function: api::ToolFunction {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            parameters: tool.parameters.clone(),
        },
    }
}

fn build_tool_choice(choice: &ToolChoiceOption) -> ModelResult<Option<String>> {
    match choice {
        ToolChoiceOption::Auto => Ok(None),
        ToolChoiceOption::None => Ok(Some("NONE".to_string())),
        ToolChoiceOption::Required => Ok(Some("REQUIRED".to_string())),
        ToolChoiceOption::Tool(_) => Err(ModelError::Unsupported(
            PROVIDER,
            "forcing a specific tool is not expressible".to_string(),
        )),
    }
}

fn build_response_format(format: &ResponseFormatOption) -> api::ResponseFormat {
    match format {
        ResponseFormatOption::Text => api::ResponseFormat::Text,
        ResponseFormatOption::Json(json) => api::ResponseFormat::JsonObject {
            json_schema: json.schema.clone(),
        },
    }
}

fn map_response_message(message: api::ResponseMessage) -> ModelResult<Vec<Part>> {
    let mut parts = Vec::new();

    for block in message.content.unwrap_or_default() {
        match block {
            api::AssistantContent::Text { text } => parts.push(Part::text(text)),
            api::AssistantContent::Thinking { thinking } => {
                parts.push(Part::Reasoning(ReasoningPart::new(thinking)));
            }
            api::AssistantContent::Other => {}
        }
    }

    for tool_call in message.tool_calls.unwrap_or_default() {
        parts.push(map_tool_call(tool_call)?);
    }

    Ok(parts)
}

fn map_tool_call(tool_call: api::ToolCall) -> ModelResult<Part> {
    let id = tool_call.id.ok_or_else(|| {
        ModelError::Invariant(PROVIDER, "tool call carried no id".to_string())
    })?;
    let function = tool_call.function.ok_or_else(|| {
        ModelError::Invariant(PROVIDER, "tool call carried no function".to_string())
    })?;
    let name = function.name.ok_or_else(|| {
        ModelError::Invariant(PROVIDER, "tool call carried no name".to_string())
    })?;
    let args = match function.arguments {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
            ModelError::Invariant(
                PROVIDER,
                format!("tool call arguments are not valid JSON: {e}"),
            )
        })?,
        _ => json!({}),
    };
    Ok(Part::tool_call(id, name, args))
}

fn map_content_event(
    event: &api::ContentEvent,
    seen: &[ContentDelta],
    content_slots: &mut HashMap<usize, usize>,
) -> Option<ContentDelta> {
    let fragment = event
        .delta
        .as_ref()
        .and_then(|delta| delta.message.as_ref())
        .and_then(|message| message.content.as_ref())?;

    let part = if let Some(thinking) = &fragment.thinking {
        PartDelta::Reasoning(ReasoningPartDelta {
            text: Some(thinking.clone()),
            ..Default::default()
        })
    } else if let Some(text) = &fragment.text {
        PartDelta::Text(TextPartDelta {
            text: text.clone(),
            citation: None,
        })
    } else {
        return None;
    };

    // Content events are indexed per content slot; pin each slot to one
    // canonical index so thinking fragments keep folding into the same
    // part.
    let index = match event.index {
        Some(provider_index) => *content_slots.entry(provider_index).or_insert_with(|| {
            seen.iter().map(|delta| delta.index + 1).max().unwrap_or(0)
        }),
        None => infer_delta_index(&part, seen, None),
    };

    Some(ContentDelta { index, part })
}

fn map_tool_call_event(event: &api::ToolCallEvent, seen: &[ContentDelta]) -> Option<ContentDelta> {
    // Events without an index cannot be reconciled; drop them.
    let provider_index = event.index?;
    let tool_call = event
        .delta
        .as_ref()
        .and_then(|delta| delta.message.as_ref())
        .and_then(|message| message.tool_calls.as_ref())?;

    let part = PartDelta::ToolCall(ToolCallPartDelta {
        tool_call_id: tool_call.id.clone(),
        tool_name: tool_call
            .function
            .as_ref()
            .and_then(|function| function.name.clone()),
        args: tool_call
            .function
            .as_ref()
            .and_then(|function| function.arguments.clone()),
        id: None,
    });

    let index = infer_delta_index(&part, seen, Some(provider_index));
    Some(ContentDelta { index, part })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn map_usage(usage: &api::Usage) -> Option<ModelUsage> {
    let tokens = usage.tokens.as_ref()?;
    Some(ModelUsage {
        input_tokens: tokens.input_tokens.unwrap_or(0.0) as u32,
        output_tokens: tokens.output_tokens.unwrap_or(0.0) as u32,
        ..Default::default()
    })
}
