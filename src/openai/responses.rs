use super::responses_api as api;
use crate::{
    flatten::flatten_source_parts,
    ident,
    telemetry::{self, ModelTelemetry},
    transport, AudioFormat, ContentDelta, ImagePart, ImagePartDelta, LanguageModel,
    LanguageModelInput, Message, Modality, ModelError, ModelMetadata, ModelResponse, ModelResult,
    ModelStream, ModelUsage, Part, PartDelta, PartialModelResponse, ReasoningPart,
    ReasoningPartDelta, ResponseFormatOption, TextPartDelta, Tool, ToolCallPartDelta,
    ToolChoiceOption,
};
use async_stream::try_stream;
use futures::StreamExt;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};

const PROVIDER: &str = "openai";

/// OpenAI Responses API. Runs stateless (`store: false`); reflected
/// assistant and reasoning items carry synthesized ids when the caller
/// has none. `top_k`, the penalty knobs, and `seed` have no wire
/// equivalent and are ignored.
pub struct OpenAiResponsesModel {
    model_id: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    metadata: Option<Arc<ModelMetadata>>,
    telemetry: Option<Arc<dyn ModelTelemetry>>,
}

#[derive(Clone, Default)]
pub struct OpenAiResponsesOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub client: Option<reqwest::Client>,
    pub telemetry: Option<Arc<dyn ModelTelemetry>>,
}

impl OpenAiResponsesModel {
    #[must_use]
    pub fn new(model_id: impl Into<String>, options: OpenAiResponsesOptions) -> Self {
        Self {
            model_id: model_id.into(),
            api_key: options.api_key,
            base_url: options
                .base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
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
        format!("{}/responses", self.base_url)
    }

    fn pricing(&self) -> Option<&crate::ModelPricing> {
        self.metadata.as_ref().and_then(|m| m.pricing.as_ref())
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiResponsesModel {
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
                let payload = build_responses_request(&input, &self.model_id, false)?;
                let response: api::Response = transport::post_json(
                    &self.client,
                    &self.endpoint(),
                    &payload,
                    self.request_headers()?,
                )
                .await?;

                let content = map_output_items(response.output)?;
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
                let payload = build_responses_request(&input, &self.model_id, true)?;
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
                    let mut refusal = String::new();

                    while let Some(event) = events.next().await {
                        let event = event?;

                        if let api::StreamEvent::Completed(completed) = &event {
                            if let Some(usage) = &completed.response.usage {
                                let usage = map_usage(usage.clone());
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

                        if let api::StreamEvent::RefusalDelta(delta) = &event {
                            refusal.push_str(&delta.delta);
                        }

                        if let Some(delta) = map_stream_event(event)? {
                            yield PartialModelResponse {
                                delta: Some(delta),
                                ..Default::default()
                            };
                        }
                    }

                    if !refusal.is_empty() {
                        Err(ModelError::Refusal(refusal))?;
                    }
                };

                Ok(ModelStream::from_stream(stream))
            },
        )
        .await
    }
}

/// Synthesizes a vendor-acceptable item id: `msg_` plus 15 random
/// alphanumerics.
fn synthesize_item_id() -> String {
    format!("msg_{}", ident::random_alphanumeric(15))
}

fn build_responses_request(
    input: &LanguageModelInput,
    model_id: &str,
    stream: bool,
) -> ModelResult<serde_json::Value> {
    let reasoning_enabled = input.reasoning.as_ref().is_some_and(|r| r.enabled);

    let mut tools: Option<Vec<api::ResponsesTool>> = input
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(build_tool).collect());

    if input
        .modalities
        .as_ref()
        .is_some_and(|modalities| modalities.contains(&Modality::Image))
    {
        // Image output is expressed as an appended image-generation tool.
        tools
            .get_or_insert_with(Vec::new)
            .push(api::ResponsesTool::ImageGeneration);
    }

    if input.audio.is_some()
        || input
            .modalities
            .as_ref()
            .is_some_and(|modalities| modalities.contains(&Modality::Audio))
    {
        return Err(ModelError::Unsupported(
            PROVIDER,
            "the responses API cannot produce audio output".to_string(),
        ));
    }

    let params = api::ResponseCreateParams {
        include: reasoning_enabled
            .then(|| vec!["reasoning.encrypted_content".to_string()]),
        input: Some(build_input_items(input.messages.clone())?),
        instructions: input
            .system_prompt
            .clone()
            .filter(|prompt| !prompt.is_empty()),
        max_output_tokens: input.max_tokens,
        model: Some(model_id.to_string()),
        reasoning: input
            .reasoning
            .as_ref()
            .map(|reasoning| -> ModelResult<api::ReasoningParams> {
                Ok(api::ReasoningParams {
                    effort: reasoning
                        .budget_tokens
                        .map(|budget| super::reasoning_effort_for_budget(budget, PROVIDER))
                        .transpose()?
                        .map(ToString::to_string),
                    summary: reasoning.enabled.then(|| "auto".to_string()),
                })
            })
            .transpose()?,
        store: Some(false),
        stream: stream.then_some(true),
        temperature: input.temperature,
        text: input.response_format.as_ref().map(build_text_config),
        tool_choice: input.tool_choice.as_ref().map(build_tool_choice),
        tools,
        top_p: input.top_p,
    };

    transport::merge_extra(&params, input.extra.as_ref(), PROVIDER)
}

fn build_input_items(messages: Vec<Message>) -> ModelResult<Vec<api::InputItem>> {
    let mut items = Vec::new();
    for message in messages {
        match message {
            Message::User(user) => items.push(build_user_item(user.content)?),
            Message::Assistant(assistant) => {
                items.extend(build_assistant_items(assistant.content)?);
            }
            Message::Tool(tool) => items.extend(build_tool_output_items(tool.content)?),
        }
    }
    Ok(items)
}

fn build_user_item(content: Vec<Part>) -> ModelResult<api::InputItem> {
    let content = flatten_source_parts(content)
        .into_iter()
        .map(|part| {
            Ok(match part {
                Part::Text(text) => api::MessageContent::InputText { text: text.text },
                Part::Image(image) => api::MessageContent::InputImage {
                    image_url: format!("data:{};base64,{}", image.mime_type, image.data),
                    detail: "auto".to_string(),
                },
                Part::Audio(audio) => {
                    let format = match audio.format {
                        AudioFormat::Wav => "wav",
                        AudioFormat::Mp3 => "mp3",
                        other => {
                            return Err(ModelError::Unsupported(
                                PROVIDER,
                                format!("input audio must be wav or mp3, got {other:?}"),
                            ))
                        }
                    };
                    api::MessageContent::InputAudio {
                        input_audio: api::InputAudioData {
                            data: audio.data,
                            format: format.to_string(),
                        },
                    }
                }
                other => {
                    return Err(ModelError::InvalidInput(format!(
                        "user messages cannot carry {} parts",
                        other.kind()
                    )))
                }
            })
        })
        .collect::<ModelResult<Vec<_>>>()?;

    Ok(api::InputItem::Message(api::InputMessage {
        id: None,
        role: "user".to_string(),
        content,
        status: None,
    }))
}

fn build_assistant_items(content: Vec<Part>) -> ModelResult<Vec<api::InputItem>> {
    flatten_source_parts(content)
        .into_iter()
        .map(|part| {
            Ok(match part {
                Part::Text(text) => api::InputItem::Message(api::InputMessage {
                    // the vendor rejects reflected assistant items that
                    // lack an id
                    id: Some(synthesize_item_id()),
                    role: "assistant".to_string(),
                    content: vec![api::MessageContent::OutputText {
                        text: text.text,
                        annotations: vec![],
                    }],
                    status: Some("completed".to_string()),
                }),
                Part::Reasoning(reasoning) => api::InputItem::Reasoning(api::ReasoningItem {
                    id: reasoning.id.unwrap_or_else(synthesize_item_id),
                    summary: vec![api::SummaryText {
                        kind: "summary_text".to_string(),
                        text: reasoning.text,
                    }],
                    encrypted_content: reasoning.signature,
                }),
                Part::ToolCall(tool_call) => api::InputItem::FunctionCall(api::FunctionCallItem {
                    arguments: tool_call.args.to_string(),
                    call_id: tool_call.tool_call_id,
                    name: tool_call.tool_name,
                    id: tool_call.id,
                }),
                Part::Image(image) => {
                    api::InputItem::ImageGenerationCall(api::ImageGenerationCallItem {
                        id: image.id.unwrap_or_else(synthesize_item_id),
                        status: "completed".to_string(),
                        result: Some(format!(
                            "data:{};base64,{}",
                            image.mime_type, image.data
                        )),
                        output_format: image
                            .mime_type
                            .strip_prefix("image/")
                            .unwrap_or("png")
                            .to_string(),
                        size: match (image.width, image.height) {
                            (Some(width), Some(height)) => Some(format!("{width}x{height}")),
                            _ => None,
                        },
                    })
                }
                other => {
                    return Err(ModelError::Unsupported(
                        PROVIDER,
                        format!(
                            "the responses API cannot reflect assistant {} parts",
                            other.kind()
                        ),
                    ))
                }
            })
        })
        .collect()
}

fn build_tool_output_items(content: Vec<Part>) -> ModelResult<Vec<api::InputItem>> {
    let mut items = Vec::new();
    for part in content {
        let Part::ToolResult(result) = part else {
            return Err(ModelError::InvalidInput(format!(
                "tool messages may only carry tool-result parts, found {}",
                part.kind()
            )));
        };
        for inner in flatten_source_parts(result.content) {
            match inner {
                Part::Text(text) => {
                    items.push(api::InputItem::FunctionCallOutput(
                        api::FunctionCallOutputItem {
                            call_id: result.tool_call_id.clone(),
                            output: text.text,
                        },
                    ));
                }
                other => {
                    return Err(ModelError::Unsupported(
                        PROVIDER,
                        format!("tool results may only carry text, found {}", other.kind()),
                    ))
                }
            }
        }
    }
    Ok(items)
}

fn build_tool(tool: &Tool) -> api::ResponsesTool {
    api::ResponsesTool::Function {
        name: tool.name.clone(),
        description: Some(tool.description.clone()),
        parameters: tool.parameters.clone(),
        strict: true,
    }
}

fn build_tool_choice(choice: &ToolChoiceOption) -> serde_json::Value {
    match choice {
        ToolChoiceOption::Auto => json!("auto"),
        ToolChoiceOption::None => json!("none"),
        ToolChoiceOption::Required => json!("required"),
        ToolChoiceOption::Tool(tool) => json!({
            "type": "function",
            "name": tool.tool_name,
        }),
    }
}

fn build_text_config(format: &ResponseFormatOption) -> api::TextConfig {
    let format = match format {
        ResponseFormatOption::Text => api::TextFormat::Text,
        ResponseFormatOption::Json(json) => match &json.schema {
            Some(schema) => api::TextFormat::JsonSchema {
                name: json.name.clone(),
                description: json.description.clone(),
                schema: schema.clone(),
                strict: true,
            },
            None => api::TextFormat::JsonObject,
        },
    };
    api::TextConfig { format }
}

fn map_output_items(items: Vec<api::OutputItem>) -> ModelResult<Vec<Part>> {
    let mut parts = Vec::new();
    for item in items {
        match item {
            api::OutputItem::Message(message) => {
                for content in message.content {
                    match content {
                        api::OutputContent::OutputText { text } => parts.push(Part::text(text)),
                        api::OutputContent::Refusal { refusal } => {
                            return Err(ModelError::Refusal(refusal))
                        }
                        api::OutputContent::Other => {}
                    }
                }
            }
            api::OutputItem::FunctionCall(function_call) => {
                let args = serde_json::from_str(&function_call.arguments).map_err(|e| {
                    ModelError::Invariant(
                        PROVIDER,
                        format!("function call arguments are not valid JSON: {e}"),
                    )
                })?;
                let mut part =
                    crate::ToolCallPart::new(function_call.call_id, function_call.name, args);
                part.id = function_call.id;
                parts.push(Part::ToolCall(part));
            }
            api::OutputItem::Reasoning(reasoning) => {
                let text = reasoning
                    .summary
                    .into_iter()
                    .map(|summary| summary.text)
                    .collect::<Vec<_>>()
                    .join("\n");
                parts.push(Part::Reasoning(ReasoningPart {
                    text,
                    signature: reasoning.encrypted_content,
                    id: Some(reasoning.id),
                }));
            }
            api::OutputItem::ImageGenerationCall(image_call) => {
                let (width, height) = image_call
                    .size
                    .as_deref()
                    .map_or((None, None), parse_size);
                parts.push(Part::Image(ImagePart {
                    data: image_call.result.ok_or_else(|| {
                        ModelError::Invariant(
                            PROVIDER,
                            "image generation call carried no result".to_string(),
                        )
                    })?,
                    mime_type: format!("image/{}", image_call.output_format),
                    width,
                    height,
                    id: Some(image_call.id),
                }));
            }
            api::OutputItem::Other => {}
        }
    }
    Ok(parts)
}

fn map_stream_event(event: api::StreamEvent) -> ModelResult<Option<ContentDelta>> {
    Ok(match event {
        api::StreamEvent::Failed(_) => {
            return Err(ModelError::Invariant(
                PROVIDER,
                "the response stream reported failure".to_string(),
            ))
        }
        api::StreamEvent::OutputItemAdded(added) => match added.item {
            api::OutputItem::FunctionCall(function_call) => Some(ContentDelta {
                index: added.output_index,
                part: PartDelta::ToolCall(ToolCallPartDelta {
                    tool_call_id: Some(function_call.call_id),
                    tool_name: Some(function_call.name),
                    args: Some(function_call.arguments),
                    id: function_call.id,
                }),
            }),
            api::OutputItem::Reasoning(reasoning) => {
                reasoning.encrypted_content.map(|signature| ContentDelta {
                    index: added.output_index,
                    part: PartDelta::Reasoning(ReasoningPartDelta {
                        signature: Some(signature),
                        id: Some(reasoning.id),
                        ..Default::default()
                    }),
                })
            }
            _ => None,
        },
        api::StreamEvent::OutputTextDelta(delta) => Some(ContentDelta {
            index: delta.output_index,
            part: PartDelta::Text(TextPartDelta {
                text: delta.delta,
                citation: None,
            }),
        }),
        api::StreamEvent::FunctionCallArgumentsDelta(delta) => Some(ContentDelta {
            index: delta.output_index,
            part: PartDelta::ToolCall(ToolCallPartDelta {
                args: Some(delta.delta),
                ..Default::default()
            }),
        }),
        api::StreamEvent::ReasoningSummaryTextDelta(delta) => Some(ContentDelta {
            index: delta.output_index,
            part: PartDelta::Reasoning(ReasoningPartDelta {
                summary: Some(delta.delta),
                ..Default::default()
            }),
        }),
        api::StreamEvent::PartialImage(partial) => {
            let (width, height) = partial.size.as_deref().map_or((None, None), parse_size);
            Some(ContentDelta {
                index: partial.output_index,
                part: PartDelta::Image(ImagePartDelta {
                    data: Some(partial.partial_image_b64),
                    mime_type: Some(format!("image/{}", partial.output_format)),
                    width,
                    height,
                    id: Some(partial.item_id),
                }),
            })
        }
        _ => None,
    })
}

fn map_usage(usage: api::ResponseUsage) -> ModelUsage {
    ModelUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        ..Default::default()
    }
}

// Sizes arrive as "{width}x{height}".
fn parse_size(size: &str) -> (Option<u32>, Option<u32>) {
    let mut dims = size.split('x');
    let width = dims.next().and_then(|raw| raw.parse().ok());
    let height = dims.next().and_then(|raw| raw.parse().ok());
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReasoningOptions, StreamAccumulator};
    use serde_json::json;

    fn input_with(messages: Vec<Message>) -> LanguageModelInput {
        LanguageModelInput {
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn requests_are_stateless_with_instructions() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.system_prompt = Some("Be terse.".into());
        let payload = build_responses_request(&input, "gpt-5", false).unwrap();
        assert_eq!(payload["store"], json!(false));
        assert_eq!(payload["instructions"], "Be terse.");
        assert_eq!(payload["input"][0]["role"], "user");
    }

    #[test]
    fn reflected_assistant_text_gets_synthesized_msg_id() {
        let input = input_with(vec![
            Message::user(["Hi"]),
            Message::assistant(["Hello!"]),
        ]);
        let payload = build_responses_request(&input, "gpt-5", false).unwrap();
        let id = payload["input"][1]["id"].as_str().unwrap();
        assert!(id.starts_with("msg_"));
        assert_eq!(id.len(), "msg_".len() + 15);
        assert!(id[4..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn reasoning_round_trips_as_summary_and_encrypted_content() {
        let input = input_with(vec![Message::assistant([Part::Reasoning(
            ReasoningPart::new("Thinking hard.")
                .with_id("r1")
                .with_signature("S"),
        )])]);
        let payload = build_responses_request(&input, "gpt-5", false).unwrap();
        assert_eq!(
            payload["input"][0],
            json!({
                "type": "reasoning",
                "id": "r1",
                "summary": [{"type": "summary_text", "text": "Thinking hard."}],
                "encrypted_content": "S",
            })
        );
    }

    #[test]
    fn enabling_reasoning_requests_encrypted_content() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.reasoning = Some(
            ReasoningOptions::enabled().with_budget(super::super::OPENAI_REASONING_EFFORT_LOW),
        );
        let payload = build_responses_request(&input, "gpt-5", false).unwrap();
        assert_eq!(payload["include"], json!(["reasoning.encrypted_content"]));
        assert_eq!(payload["reasoning"], json!({"effort": "low", "summary": "auto"}));
    }

    #[test]
    fn image_modality_appends_image_generation_tool() {
        let mut input = input_with(vec![Message::user(["Draw a fox"])]);
        input.modalities = Some(vec![Modality::Text, Modality::Image]);
        let payload = build_responses_request(&input, "gpt-5", false).unwrap();
        assert_eq!(payload["tools"], json!([{"type": "image_generation"}]));
    }

    #[test]
    fn audio_modality_is_unsupported() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.modalities = Some(vec![Modality::Audio]);
        assert!(matches!(
            build_responses_request(&input, "gpt-5", false),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn refusal_output_maps_to_refusal_error() {
        let items = vec![api::OutputItem::Message(api::OutputMessage {
            content: vec![api::OutputContent::Refusal {
                refusal: "I can't help.".into(),
            }],
        })];
        assert!(matches!(
            map_output_items(items),
            Err(ModelError::Refusal(text)) if text == "I can't help."
        ));
    }

    #[test]
    fn reasoning_stream_accumulates_to_round_trippable_part() {
        // item added primes signature+id, then summary text arrives in
        // fragments
        let events: Vec<api::StreamEvent> = vec![
            serde_json::from_value(json!({
                "type": "response.output_item.added",
                "output_index": 0,
                "item": {
                    "type": "reasoning",
                    "id": "r1",
                    "summary": [],
                    "encrypted_content": "S",
                },
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "type": "response.reasoning_summary_text.delta",
                "output_index": 0,
                "delta": "Thinking ",
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "type": "response.reasoning_summary_text.delta",
                "output_index": 0,
                "delta": "hard.",
            }))
            .unwrap(),
        ];

        let mut acc = StreamAccumulator::new();
        for event in events {
            if let Some(delta) = map_stream_event(event).unwrap() {
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
                ReasoningPart::new("Thinking hard.")
                    .with_signature("S")
                    .with_id("r1")
            )]
        );
    }

    #[test]
    fn unknown_stream_events_are_ignored() {
        let event: api::StreamEvent = serde_json::from_value(json!({
            "type": "response.web_search_call.searching",
            "anything": true,
        }))
        .unwrap();
        assert!(map_stream_event(event).unwrap().is_none());
    }

    #[test]
    fn failed_event_is_an_invariant_error() {
        let event: api::StreamEvent =
            serde_json::from_value(json!({"type": "response.failed"})).unwrap();
        assert!(matches!(
            map_stream_event(event),
            Err(ModelError::Invariant(PROVIDER, _))
        ));
    }
}
