use super::chat_api as api;
use crate::{
    delta::infer_delta_index,
    flatten::flatten_source_parts,
    telemetry::{self, ModelTelemetry},
    transport, AudioFormat, AudioPart, AudioPartDelta, ContentDelta, LanguageModel,
    LanguageModelInput, Message, Modality, ModelError, ModelMetadata, ModelResponse, ModelResult,
    ModelStream, ModelTokensDetails, ModelUsage, Part, PartDelta, PartialModelResponse,
    ResponseFormatOption, TextPart, Tool, ToolCallPart, ToolCallPartDelta, ToolChoiceOption,
};
use async_stream::try_stream;
use futures::StreamExt;
use std::{collections::HashMap, sync::Arc};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// pcm16 output is fixed-rate mono.
const PCM16_SAMPLE_RATE: u32 = 24_000;
const PCM16_CHANNELS: u32 = 1;

/// OpenAI Chat Completions. `top_k` has no wire equivalent and is
/// ignored.
pub struct OpenAiChatModel {
    model_id: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    metadata: Option<Arc<ModelMetadata>>,
    telemetry: Option<Arc<dyn ModelTelemetry>>,
}

#[derive(Clone, Default)]
pub struct OpenAiChatOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub client: Option<reqwest::Client>,
    pub telemetry: Option<Arc<dyn ModelTelemetry>>,
}

impl OpenAiChatModel {
    #[must_use]
    pub fn new(model_id: impl Into<String>, options: OpenAiChatOptions) -> Self {
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
impl LanguageModel for OpenAiChatModel {
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
                let (request, payload) = build_chat_request(&input, &self.model_id, false)?;
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

                if let Some(refusal) = &choice.message.refusal {
                    if !refusal.is_empty() {
                        return Err(ModelError::Refusal(refusal.clone()));
                    }
                }

                let content = map_response_message(choice.message, request.audio.as_ref())?;
                let usage = response
                    .usage
                    .map(|usage| map_usage(usage, &input.messages));
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
                let (request, payload) = build_chat_request(&input, &self.model_id, true)?;
                let mut events: std::pin::Pin<
                    Box<dyn futures::Stream<Item = ModelResult<api::ChatCompletionChunk>> + Send>,
                > = transport::post_sse(
                    &self.client,
                    &self.endpoint(),
                    &payload,
                    self.request_headers()?,
                    PROVIDER,
                )
                .await?;

                let audio_params = request.audio.clone();
                let pricing = self.pricing().cloned();
                let messages = input.messages.clone();

                let stream = try_stream! {
                    let mut seen: Vec<ContentDelta> = Vec::new();
                    let mut refusal = String::new();

                    while let Some(chunk) = events.next().await {
                        let chunk = chunk?;

                        if let Some(choice) = chunk.choices.unwrap_or_default().into_iter().next() {
                            if let Some(fragment) = &choice.delta.refusal {
                                refusal.push_str(fragment);
                            }

                            let deltas =
                                map_chunk_delta(choice.delta, &seen, audio_params.as_ref())?;
                            for delta in deltas {
                                seen.push(delta.clone());
                                yield PartialModelResponse {
                                    delta: Some(delta),
                                    ..Default::default()
                                };
                            }
                        }

                        if let Some(usage) = chunk.usage {
                            let usage = map_usage(usage, &messages);
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

fn build_chat_request(
    input: &LanguageModelInput,
    model_id: &str,
    stream: bool,
) -> ModelResult<(api::ChatCompletionRequest, serde_json::Value)> {
    let request = api::ChatCompletionRequest {
        messages: build_messages(input.messages.clone(), input.system_prompt.clone())?,
        model: model_id.to_string(),
        audio: input.audio.as_ref().map(build_audio_params).transpose()?,
        frequency_penalty: input.frequency_penalty,
        max_completion_tokens: input.max_tokens,
        modalities: input
            .modalities
            .as_ref()
            .map(|modalities| {
                modalities
                    .iter()
                    .map(|modality| match modality {
                        Modality::Text => Ok("text".to_string()),
                        Modality::Audio => Ok("audio".to_string()),
                        Modality::Image => Err(ModelError::Unsupported(
                            PROVIDER,
                            "chat completions cannot produce image output".to_string(),
                        )),
                    })
                    .collect::<ModelResult<Vec<_>>>()
            })
            .transpose()?,
        presence_penalty: input.presence_penalty,
        reasoning_effort: input
            .reasoning
            .as_ref()
            .and_then(|reasoning| reasoning.budget_tokens)
            .map(|budget| super::reasoning_effort_for_budget(budget, PROVIDER))
            .transpose()?
            .map(ToString::to_string),
        response_format: input.response_format.as_ref().map(build_response_format),
        seed: input.seed,
        stream: stream.then_some(true),
        stream_options: stream.then_some(api::StreamOptions {
            include_usage: true,
        }),
        temperature: input.temperature,
        tool_choice: input.tool_choice.as_ref().map(build_tool_choice),
        tools: input
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(build_tool).collect()),
        top_p: input.top_p,
    };

    let payload = transport::merge_extra(&request, input.extra.as_ref(), PROVIDER)?;
    Ok((request, payload))
}

fn build_messages(
    messages: Vec<Message>,
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
            Message::User(user) => out.push(api::ChatMessage::User(build_user_message(
                user.content,
            )?)),
            Message::Assistant(assistant) => out.push(api::ChatMessage::Assistant(
                build_assistant_message(assistant.content)?,
            )),
            Message::Tool(tool) => {
                out.extend(
                    build_tool_messages(tool.content)?
                        .into_iter()
                        .map(api::ChatMessage::Tool),
                );
            }
        }
    }

    Ok(out)
}

fn build_user_message(content: Vec<Part>) -> ModelResult<api::UserMessage> {
    let mut parts = Vec::new();
    for part in flatten_source_parts(content) {
        match part {
            Part::Text(text) => parts.push(api::ContentPart::Text { text: text.text }),
            Part::Image(image) => parts.push(api::ContentPart::ImageUrl {
                image_url: api::ImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, image.data),
                },
            }),
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
                parts.push(api::ContentPart::InputAudio {
                    input_audio: api::InputAudio {
                        data: audio.data,
                        format: format.to_string(),
                    },
                });
            }
            other => {
                return Err(ModelError::InvalidInput(format!(
                    "user messages cannot carry {} parts",
                    other.kind()
                )))
            }
        }
    }

    if parts.is_empty() {
        return Err(ModelError::InvalidInput(
            "user message content must not be empty".to_string(),
        ));
    }
    Ok(api::UserMessage { content: parts })
}

fn build_assistant_message(content: Vec<Part>) -> ModelResult<api::AssistantMessage> {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut audio = None;

    for part in flatten_source_parts(content) {
        match part {
            Part::Text(text) => text_parts.push(api::ContentPart::Text { text: text.text }),
            Part::ToolCall(tool_call) => tool_calls.push(build_assistant_tool_call(&tool_call)?),
            Part::Audio(part) => {
                // Chat completions reflect prior audio output by id only.
                let id = part.id.ok_or_else(|| {
                    ModelError::Unsupported(
                        PROVIDER,
                        "assistant audio without an id cannot be reflected".to_string(),
                    )
                })?;
                audio = Some(api::AssistantAudioRef { id });
            }
            other => {
                return Err(ModelError::Unsupported(
                    PROVIDER,
                    format!(
                        "chat completions cannot reflect assistant {} parts",
                        other.kind()
                    ),
                ))
            }
        }
    }

    Ok(api::AssistantMessage {
        content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts)
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        audio,
    })
}

fn build_assistant_tool_call(part: &ToolCallPart) -> ModelResult<api::AssistantToolCall> {
    let arguments = serde_json::to_string(&part.args).map_err(|e| {
        ModelError::InvalidInput(format!("tool call arguments failed to serialize: {e}"))
    })?;
    Ok(api::AssistantToolCall {
        // Legacy path: without a message-level id, the tool_call_id doubles
        // as the wire id.
        id: part.id.clone().unwrap_or_else(|| part.tool_call_id.clone()),
        kind: "function".to_string(),
        function: api::FunctionCall {
            name: part.tool_name.clone(),
            arguments,
        },
    })
}

fn build_tool_messages(content: Vec<Part>) -> ModelResult<Vec<api::ToolMessage>> {
    let mut out = Vec::new();
    for part in content {
        let Part::ToolResult(result) = part else {
            return Err(ModelError::InvalidInput(format!(
                "tool messages may only carry tool-result parts, found {}",
                part.kind()
            )));
        };

        let mut parts = Vec::new();
        for inner in flatten_source_parts(result.content) {
            match inner {
                Part::Text(text) => parts.push(api::ContentPart::Text { text: text.text }),
                other => {
                    return Err(ModelError::Unsupported(
                        PROVIDER,
                        format!("tool results may only carry text, found {}", other.kind()),
                    ))
                }
            }
        }

        out.push(api::ToolMessage {
            content: parts,
            tool_call_id: result.tool_call_id,
        });
    }
    Ok(out)
}

fn build_tool(tool: &Tool) -> api::ChatTool {
    api::ChatTool {
        kind: "function".to_string(),
        function: api::FunctionDefinition {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            parameters: Some(tool.parameters.clone()),
            strict: Some(true),
        },
    }
}

fn build_tool_choice(choice: &ToolChoiceOption) -> api::ToolChoice {
    match choice {
        ToolChoiceOption::Auto => api::ToolChoice::Mode("auto".to_string()),
        ToolChoiceOption::None => api::ToolChoice::Mode("none".to_string()),
        ToolChoiceOption::Required => api::ToolChoice::Mode("required".to_string()),
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
                    schema: Some(schema.clone()),
                    strict: Some(true),
                },
            },
            None => api::ResponseFormat::JsonObject,
        },
    }
}

fn build_audio_params(options: &crate::AudioOptions) -> ModelResult<api::ChatAudioParams> {
    let voice = options.voice.clone().ok_or_else(|| {
        ModelError::InvalidInput("audio output requires a voice".to_string())
    })?;
    let format = match options.format {
        Some(AudioFormat::Wav) => "wav",
        Some(AudioFormat::Mp3) => "mp3",
        Some(AudioFormat::Flac) => "flac",
        Some(AudioFormat::Opus) => "opus",
        Some(AudioFormat::Aac) => "aac",
        Some(AudioFormat::Linear16) => "pcm16",
        Some(other) => {
            return Err(ModelError::Unsupported(
                PROVIDER,
                format!("audio output format {other:?} is not available"),
            ))
        }
        None => {
            return Err(ModelError::InvalidInput(
                "audio output requires a format".to_string(),
            ))
        }
    };
    Ok(api::ChatAudioParams {
        voice,
        format: format.to_string(),
    })
}

fn output_audio_format(params: &api::ChatAudioParams) -> AudioFormat {
    match params.format.as_str() {
        "mp3" => AudioFormat::Mp3,
        "flac" => AudioFormat::Flac,
        "opus" => AudioFormat::Opus,
        "aac" => AudioFormat::Aac,
        "pcm16" => AudioFormat::Linear16,
        _ => AudioFormat::Wav,
    }
}

fn map_response_message(
    message: api::ResponseMessage,
    audio_params: Option<&api::ChatAudioParams>,
) -> ModelResult<Vec<Part>> {
    let mut parts = Vec::new();

    if let Some(content) = message.content {
        if !content.is_empty() {
            parts.push(Part::Text(TextPart::new(content)));
        }
    }

    if let Some(audio) = message.audio {
        let format = audio_params.map(output_audio_format).ok_or_else(|| {
            ModelError::Invariant(
                PROVIDER,
                "audio came back without audio having been requested".to_string(),
            )
        })?;
        let mut part = AudioPart {
            data: audio.data,
            format,
            sample_rate: None,
            channels: None,
            transcript: audio.transcript,
            id: Some(audio.id),
        };
        if format == AudioFormat::Linear16 {
            part.sample_rate = Some(PCM16_SAMPLE_RATE);
            part.channels = Some(PCM16_CHANNELS);
        }
        parts.push(Part::Audio(part));
    }

    for tool_call in message.tool_calls.unwrap_or_default() {
        parts.push(Part::ToolCall(map_tool_call(tool_call)?));
    }

    Ok(parts)
}

fn map_tool_call(tool_call: api::ResponseToolCall) -> ModelResult<ToolCallPart> {
    if tool_call.kind != "function" {
        return Err(ModelError::NotImplemented(
            PROVIDER,
            format!("tool calls of type {:?} are not mapped", tool_call.kind),
        ));
    }
    let function = tool_call.function.ok_or_else(|| {
        ModelError::Invariant(PROVIDER, "function tool call without a function".to_string())
    })?;
    let args = serde_json::from_str(&function.arguments).map_err(|e| {
        ModelError::Invariant(
            PROVIDER,
            format!("tool call arguments are not valid JSON: {e}"),
        )
    })?;

    Ok(ToolCallPart {
        tool_call_id: tool_call.id.clone(),
        tool_name: function.name,
        args,
        id: Some(tool_call.id),
    })
}

fn map_chunk_delta(
    delta: api::ChunkDelta,
    seen: &[ContentDelta],
    audio_params: Option<&api::ChatAudioParams>,
) -> ModelResult<Vec<ContentDelta>> {
    let mut out: Vec<ContentDelta> = Vec::new();

    if let Some(content) = delta.content {
        if !content.is_empty() {
            let part = PartDelta::text(content);
            let combined: Vec<ContentDelta> =
                seen.iter().chain(out.iter()).cloned().collect();
            let index = infer_delta_index(&part, &combined, None);
            out.push(ContentDelta { index, part });
        }
    }

    if let Some(audio) = delta.audio {
        let format = audio_params.map(output_audio_format);
        let mut audio_delta = AudioPartDelta {
            data: audio.data,
            format,
            sample_rate: None,
            channels: None,
            transcript: audio.transcript,
            id: audio.id,
        };
        if format == Some(AudioFormat::Linear16) {
            audio_delta.sample_rate = Some(PCM16_SAMPLE_RATE);
            audio_delta.channels = Some(PCM16_CHANNELS);
        }
        let part = PartDelta::Audio(audio_delta);
        let combined: Vec<ContentDelta> = seen.iter().chain(out.iter()).cloned().collect();
        let index = infer_delta_index(&part, &combined, None);
        out.push(ContentDelta { index, part });
    }

    for tool_call in delta.tool_calls.unwrap_or_default() {
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
        let combined: Vec<ContentDelta> = seen.iter().chain(out.iter()).cloned().collect();
        let index = infer_delta_index(&part, &combined, Some(tool_call.index as usize));
        out.push(ContentDelta { index, part });
    }

    Ok(out)
}

fn map_usage(usage: api::ChatUsage, messages: &[Message]) -> ModelUsage {
    let mut mapped = ModelUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        input_tokens_details: None,
        output_tokens_details: None,
    };

    if let Some(details) = usage.prompt_tokens_details {
        let mut input_details = ModelTokensDetails {
            text_tokens: details.text_tokens,
            audio_tokens: details.audio_tokens,
            image_tokens: details.image_tokens,
            ..Default::default()
        };

        if let Some(cached) = details.cached_tokens_details {
            input_details.cached_text_tokens = cached.text_tokens;
            input_details.cached_audio_tokens = cached.audio_tokens;
        } else if let Some(cached_tokens) = details.cached_tokens {
            // Undifferentiated cached count; attribute it by which input
            // modalities are actually present.
            let has_text = has_user_part(messages, |part| matches!(part, Part::Text(_)));
            let has_audio = has_user_part(messages, |part| matches!(part, Part::Audio(_)));
            if has_text {
                input_details.cached_text_tokens = Some(cached_tokens);
            }
            if has_audio {
                input_details.cached_audio_tokens = Some(cached_tokens);
            }
        }
        mapped.input_tokens_details = Some(input_details);
    }

    if let Some(details) = usage.completion_tokens_details {
        mapped.output_tokens_details = Some(ModelTokensDetails {
            text_tokens: details.text_tokens,
            audio_tokens: details.audio_tokens,
            ..Default::default()
        });
    }

    mapped
}

fn has_user_part(messages: &[Message], predicate: impl Fn(&Part) -> bool) -> bool {
    messages.iter().any(|message| match message {
        Message::User(user) => user.content.iter().any(&predicate),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResponseFormatJson, ToolChoiceTool};
    use serde_json::json;

    fn input_with(messages: Vec<Message>) -> LanguageModelInput {
        LanguageModelInput {
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn system_prompt_becomes_leading_system_message() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.system_prompt = Some("Be terse.".into());
        let (_, payload) = build_chat_request(&input, "gpt-4o", false).unwrap();
        assert_eq!(
            payload["messages"][0],
            json!({"role": "system", "content": "Be terse."})
        );
        assert_eq!(payload["messages"][1]["role"], "user");
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.system_prompt = Some(String::new());
        let (_, payload) = build_chat_request(&input, "gpt-4o", false).unwrap();
        assert_eq!(payload["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn named_tool_choice_serializes_as_forced_function() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.tool_choice = Some(ToolChoiceOption::Tool(ToolChoiceTool {
            tool_name: "wx".into(),
        }));
        let (_, payload) = build_chat_request(&input, "gpt-4o", false).unwrap();
        assert_eq!(
            payload["tool_choice"],
            json!({"type": "function", "function": {"name": "wx"}})
        );
    }

    #[test]
    fn json_schema_format_sets_strict() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.response_format = Some(ResponseFormatOption::Json(ResponseFormatJson {
            name: "result".into(),
            description: None,
            schema: Some(json!({"type": "object"})),
        }));
        let (_, payload) = build_chat_request(&input, "gpt-4o", false).unwrap();
        assert_eq!(payload["response_format"]["type"], "json_schema");
        assert_eq!(payload["response_format"]["json_schema"]["strict"], json!(true));
    }

    #[test]
    fn schemaless_json_uses_json_object_mode() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.response_format = Some(ResponseFormatOption::Json(ResponseFormatJson {
            name: "result".into(),
            description: None,
            schema: None,
        }));
        let (_, payload) = build_chat_request(&input, "gpt-4o", false).unwrap();
        assert_eq!(payload["response_format"], json!({"type": "json_object"}));
    }

    #[test]
    fn image_parts_become_data_urls() {
        let input = input_with(vec![Message::user([Part::image("aGk=", "image/png")])]);
        let (_, payload) = build_chat_request(&input, "gpt-4o", false).unwrap();
        assert_eq!(
            payload["messages"][0]["content"][0]["image_url"]["url"],
            "data:image/png;base64,aGk="
        );
    }

    #[test]
    fn streaming_requests_include_usage() {
        let input = input_with(vec![Message::user(["Hi"])]);
        let (_, payload) = build_chat_request(&input, "gpt-4o", true).unwrap();
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["stream_options"]["include_usage"], json!(true));
    }

    #[test]
    fn extra_merges_over_the_payload() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.extra = Some(json!({"service_tier": "flex"}));
        let (_, payload) = build_chat_request(&input, "gpt-4o", false).unwrap();
        assert_eq!(payload["service_tier"], "flex");
    }

    #[test]
    fn reasoning_parts_in_user_messages_are_invalid() {
        let input = input_with(vec![Message::user([Part::reasoning("hm")])]);
        assert!(matches!(
            build_chat_request(&input, "gpt-4o", false),
            Err(ModelError::InvalidInput(_))
        ));
    }

    #[test]
    fn assistant_reasoning_is_unsupported_here() {
        let input = input_with(vec![Message::assistant([Part::reasoning("hm")])]);
        assert!(matches!(
            build_chat_request(&input, "gpt-4o", false),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn non_sentinel_reasoning_budget_is_unsupported() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.reasoning = Some(crate::ReasoningOptions::enabled().with_budget(1234));
        assert!(matches!(
            build_chat_request(&input, "o3", false),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn source_parts_flatten_for_user_messages() {
        let input = input_with(vec![Message::user([Part::source(
            "doc",
            "T",
            vec![Part::text("evidence")],
        )])]);
        let (_, payload) = build_chat_request(&input, "gpt-4o", false).unwrap();
        assert_eq!(
            payload["messages"][0]["content"],
            json!([{"type": "text", "text": "evidence"}])
        );
    }

    #[test]
    fn parallel_tool_call_chunks_get_distinct_indices() {
        // open text, then two tool calls arriving interleaved by provider
        // tool index
        let mut seen: Vec<ContentDelta> = Vec::new();

        let steps: Vec<api::ChunkDelta> = vec![
            api::ChunkDelta {
                content: Some("Let me check.".into()),
                ..Default::default()
            },
            api::ChunkDelta {
                tool_calls: Some(vec![api::ChunkToolCall {
                    index: 0,
                    id: Some("c1".into()),
                    function: Some(api::ChunkFunctionCall {
                        name: Some("wx".into()),
                        arguments: Some("{\"c\":\"".into()),
                    }),
                }]),
                ..Default::default()
            },
            api::ChunkDelta {
                tool_calls: Some(vec![api::ChunkToolCall {
                    index: 1,
                    id: Some("c2".into()),
                    function: Some(api::ChunkFunctionCall {
                        name: Some("wx".into()),
                        arguments: Some("{\"c\":\"".into()),
                    }),
                }]),
                ..Default::default()
            },
            api::ChunkDelta {
                tool_calls: Some(vec![api::ChunkToolCall {
                    index: 0,
                    id: None,
                    function: Some(api::ChunkFunctionCall {
                        name: None,
                        arguments: Some("NYC\"}".into()),
                    }),
                }]),
                ..Default::default()
            },
            api::ChunkDelta {
                tool_calls: Some(vec![api::ChunkToolCall {
                    index: 1,
                    id: None,
                    function: Some(api::ChunkFunctionCall {
                        name: None,
                        arguments: Some("SF\"}".into()),
                    }),
                }]),
                ..Default::default()
            },
        ];

        let mut acc = crate::StreamAccumulator::new();
        for step in steps {
            for delta in map_chunk_delta(step, &seen, None).unwrap() {
                seen.push(delta.clone());
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
            vec![
                Part::text("Let me check."),
                Part::tool_call("c1", "wx", json!({"c": "NYC"})),
                Part::tool_call("c2", "wx", json!({"c": "SF"})),
            ]
        );
    }

    #[test]
    fn response_tool_calls_map_with_parsed_args() {
        let message: api::ResponseMessage = serde_json::from_value(json!({
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "wx", "arguments": "{\"c\":\"NYC\"}"},
            }],
        }))
        .unwrap();
        let parts = map_response_message(message, None).unwrap();
        assert_eq!(
            parts,
            vec![Part::ToolCall(
                crate::ToolCallPart::new("call_1", "wx", json!({"c": "NYC"})).with_id("call_1")
            )]
        );
    }

    #[test]
    fn cached_tokens_attribute_to_present_modalities() {
        let messages = vec![Message::user(["Hi"])];
        let usage = map_usage(
            api::ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 1,
                prompt_tokens_details: Some(api::PromptTokensDetails {
                    cached_tokens: Some(4),
                    ..Default::default()
                }),
                completion_tokens_details: None,
            },
            &messages,
        );
        let details = usage.input_tokens_details.unwrap();
        assert_eq!(details.cached_text_tokens, Some(4));
        assert_eq!(details.cached_audio_tokens, None);
    }
}
