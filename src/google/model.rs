use super::api;
use crate::{
    delta::{infer_delta_index, part_to_delta},
    flatten::flatten_source_parts,
    ident,
    telemetry::{self, ModelTelemetry},
    transport, AudioFormat, AudioPart, ContentDelta, ImagePart, LanguageModel, LanguageModelInput,
    Message, Modality, ModelError, ModelMetadata, ModelResponse, ModelResult, ModelStream,
    ModelTokensDetails, ModelUsage, Part, PartialModelResponse, ReasoningPart,
    ResponseFormatOption, ToolChoiceOption,
};
use async_stream::try_stream;
use futures::StreamExt;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};

const PROVIDER: &str = "google";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini GenerateContent API. Auth rides in the URL query string.
pub struct GoogleModel {
    model_id: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    metadata: Option<Arc<ModelMetadata>>,
    telemetry: Option<Arc<dyn ModelTelemetry>>,
}

#[derive(Clone, Default)]
pub struct GoogleOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub client: Option<reqwest::Client>,
    pub telemetry: Option<Arc<dyn ModelTelemetry>>,
}

impl GoogleModel {
    #[must_use]
    pub fn new(model_id: impl Into<String>, options: GoogleOptions) -> Self {
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
        transport::build_headers(
            self.headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )
    }

    fn pricing(&self) -> Option<&crate::ModelPricing> {
        self.metadata.as_ref().and_then(|m| m.pricing.as_ref())
    }
}

#[async_trait::async_trait]
impl LanguageModel for GoogleModel {
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
                let payload = build_generate_request(&input)?;
                let url = format!(
                    "{}/models/{}:generateContent?key={}",
                    self.base_url, self.model_id, self.api_key
                );
                let response: api::GenerateContentResponse = transport::post_json(
                    &self.client,
                    &url,
                    &payload,
                    self.request_headers()?,
                )
                .await?;

                let candidate = response
                    .candidates
                    .and_then(|candidates| candidates.into_iter().next())
                    .ok_or_else(|| {
                        ModelError::Invariant(
                            PROVIDER,
                            "response carried no candidates".to_string(),
                        )
                    })?;

                let content = map_parts(
                    candidate
                        .content
                        .and_then(|content| content.parts)
                        .unwrap_or_default(),
                )?;

                let usage = response.usage_metadata.map(|metadata| map_usage(&metadata));
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
                let payload = build_generate_request(&input)?;
                let url = format!(
                    "{}/models/{}:streamGenerateContent?key={}&alt=sse",
                    self.base_url, self.model_id, self.api_key
                );
                let mut chunks = transport::post_sse::<_, api::GenerateContentResponse>(
                    &self.client,
                    &url,
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

                        let parts = chunk
                            .candidates
                            .and_then(|candidates| candidates.into_iter().next())
                            .and_then(|candidate| candidate.content)
                            .and_then(|content| content.parts)
                            .unwrap_or_default();

                        for delta in map_parts_to_deltas(parts, &seen)? {
                            seen.push(delta.clone());
                            yield PartialModelResponse {
                                delta: Some(delta),
                                ..Default::default()
                            };
                        }

                        if let Some(metadata) = chunk.usage_metadata {
                            let usage = map_usage(&metadata);
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

fn build_generate_request(input: &LanguageModelInput) -> ModelResult<serde_json::Value> {
    let mut config = api::GenerationConfig {
        temperature: input.temperature,
        top_p: input.top_p,
        top_k: input.top_k,
        max_output_tokens: input.max_tokens,
        presence_penalty: input.presence_penalty,
        frequency_penalty: input.frequency_penalty,
        seed: input.seed,
        ..Default::default()
    };

    if let Some(format) = &input.response_format {
        let (mime_type, schema) = match format {
            ResponseFormatOption::Text => ("text/plain", None),
            ResponseFormatOption::Json(json) => ("application/json", json.schema.clone()),
        };
        config.response_mime_type = Some(mime_type.to_string());
        config.response_json_schema = schema;
    }

    if let Some(modalities) = &input.modalities {
        config.response_modalities = Some(
            modalities
                .iter()
                .map(|modality| match modality {
                    Modality::Text => "TEXT".to_string(),
                    Modality::Image => "IMAGE".to_string(),
                    Modality::Audio => "AUDIO".to_string(),
                })
                .collect(),
        );
    }

    if let Some(audio) = &input.audio {
        if let Some(voice) = &audio.voice {
            config.speech_config = Some(api::SpeechConfig {
                voice_config: api::VoiceConfig {
                    prebuilt_voice_config: api::PrebuiltVoiceConfig {
                        voice_name: voice.clone(),
                    },
                },
            });
        }
    }

    if let Some(reasoning) = &input.reasoning {
        config.thinking_config = Some(api::ThinkingConfig {
            include_thoughts: reasoning.enabled,
            thinking_budget: reasoning.budget_tokens,
        });
    }

    let request = api::GenerateContentRequest {
        contents: build_contents(&input.messages)?,
        system_instruction: input
            .system_prompt
            .clone()
            .filter(|prompt| !prompt.is_empty())
            .map(|prompt| api::Content {
                role: Some("system".to_string()),
                parts: Some(vec![api::GooglePart {
                    text: Some(prompt),
                    ..Default::default()
                }]),
            }),
        generation_config: Some(config),
        tools: input.tools.as_ref().map(|tools| {
            vec![api::GoogleTool {
                function_declarations: tools
                    .iter()
                    .map(|tool| api::FunctionDeclaration {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters_json_schema: Some(tool.parameters.clone()),
                    })
                    .collect(),
            }]
        }),
        tool_config: input.tool_choice.as_ref().map(|choice| api::ToolConfig {
            function_calling_config: build_function_calling_config(choice),
        }),
    };

    transport::merge_extra(&request, input.extra.as_ref(), PROVIDER)
}

fn build_contents(messages: &[Message]) -> ModelResult<Vec<api::Content>> {
    messages
        .iter()
        .map(|message| {
            let (role, parts) = match message {
                Message::User(user) => (
                    "user",
                    user.content
                        .iter()
                        .map(build_user_parts)
                        .collect::<ModelResult<Vec<_>>>()?,
                ),
                Message::Assistant(assistant) => (
                    "model",
                    assistant
                        .content
                        .iter()
                        .map(build_assistant_parts)
                        .collect::<ModelResult<Vec<_>>>()?,
                ),
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
                            .map(build_parts)
                            .collect::<ModelResult<Vec<_>>>()?,
                    )
                }
            };
            Ok(api::Content {
                role: Some(role.to_string()),
                parts: Some(parts.into_iter().flatten().collect()),
            })
        })
        .collect()
}

fn build_user_parts(part: &Part) -> ModelResult<Vec<api::GooglePart>> {
    match part {
        Part::ToolCall(_) | Part::Reasoning(_) => Err(ModelError::InvalidInput(format!(
            "user messages cannot carry {} parts",
            part.kind()
        ))),
        other => build_parts(other),
    }
}

fn build_assistant_parts(part: &Part) -> ModelResult<Vec<api::GooglePart>> {
    match part {
        Part::ToolResult(_) => Err(ModelError::Unsupported(
            PROVIDER,
            "assistant messages cannot carry tool-result parts".to_string(),
        )),
        other => build_parts(other),
    }
}

fn build_parts(part: &Part) -> ModelResult<Vec<api::GooglePart>> {
    Ok(match part {
        Part::Text(text) => vec![api::GooglePart {
            text: Some(text.text.clone()),
            ..Default::default()
        }],
        Part::Image(image) => vec![api::GooglePart {
            inline_data: Some(api::Blob {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            }),
            ..Default::default()
        }],
        Part::Audio(audio) => vec![api::GooglePart {
            inline_data: Some(api::Blob {
                mime_type: audio.format.mime_type().to_string(),
                data: audio.data.clone(),
            }),
            ..Default::default()
        }],
        Part::Reasoning(reasoning) => vec![api::GooglePart {
            text: Some(reasoning.text.clone()),
            thought: Some(true),
            thought_signature: reasoning.signature.clone(),
            ..Default::default()
        }],
        // no native citation container; surface the inner evidence
        Part::Source(source) => flatten_source_parts(source.content.clone())
            .iter()
            .map(build_parts)
            .collect::<ModelResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect(),
        Part::ToolCall(tool_call) => vec![api::GooglePart {
            function_call: Some(api::FunctionCall {
                id: Some(tool_call.tool_call_id.clone()),
                name: Some(tool_call.tool_name.clone()),
                args: Some(tool_call.args.clone()),
            }),
            ..Default::default()
        }],
        Part::ToolResult(result) => vec![api::GooglePart {
            function_response: Some(api::FunctionResponse {
                id: Some(result.tool_call_id.clone()),
                name: result.tool_name.clone(),
                response: build_function_response(&result.content, result.is_error),
            }),
            ..Default::default()
        }],
    })
}

fn build_function_response(
    content: &[Part],
    is_error: bool,
) -> HashMap<String, serde_json::Value> {
    let texts: Vec<String> = flatten_source_parts(content.to_vec())
        .into_iter()
        .filter_map(|part| match part {
            Part::Text(text) => Some(text.text),
            _ => None,
        })
        .collect();

    let values: Vec<serde_json::Value> = texts
        .into_iter()
        .map(|text| serde_json::from_str(&text).unwrap_or_else(|_| json!({"data": text})))
        .collect();

    let value = if values.len() == 1 {
        values.into_iter().next().unwrap_or_else(|| json!({}))
    } else {
        json!(values)
    };

    let key = if is_error { "error" } else { "output" };
    HashMap::from([(key.to_string(), value)])
}

fn build_function_calling_config(choice: &ToolChoiceOption) -> api::FunctionCallingConfig {
    match choice {
        ToolChoiceOption::Auto => api::FunctionCallingConfig {
            mode: api::FunctionCallingMode::Auto,
            allowed_function_names: None,
        },
        ToolChoiceOption::None => api::FunctionCallingConfig {
            mode: api::FunctionCallingMode::None,
            allowed_function_names: None,
        },
        ToolChoiceOption::Required => api::FunctionCallingConfig {
            mode: api::FunctionCallingMode::Any,
            allowed_function_names: None,
        },
        ToolChoiceOption::Tool(tool) => api::FunctionCallingConfig {
            mode: api::FunctionCallingMode::Any,
            allowed_function_names: Some(vec![tool.tool_name.clone()]),
        },
    }
}

fn map_parts(parts: Vec<api::GooglePart>) -> ModelResult<Vec<Part>> {
    let mut mapped = Vec::new();
    for part in parts {
        if let Some(text) = part.text {
            if part.thought.unwrap_or(false) {
                let mut reasoning = ReasoningPart::new(text);
                reasoning.signature = part.thought_signature;
                mapped.push(Part::Reasoning(reasoning));
            } else {
                mapped.push(Part::text(text));
            }
        } else if let Some(blob) = part.inline_data {
            if blob.mime_type.starts_with("image/") {
                mapped.push(Part::Image(ImagePart::new(blob.data, blob.mime_type)));
            } else if blob.mime_type.starts_with("audio/") {
                let format = AudioFormat::from_mime_type(&blob.mime_type).map_err(|_| {
                    ModelError::Invariant(
                        PROVIDER,
                        format!("unrecognized audio mime type: {}", blob.mime_type),
                    )
                })?;
                mapped.push(Part::Audio(AudioPart::new(blob.data, format)));
            }
        } else if let Some(function_call) = part.function_call {
            let name = function_call.name.ok_or_else(|| {
                ModelError::Invariant(PROVIDER, "function call carried no name".to_string())
            })?;
            mapped.push(Part::tool_call(
                // ids are not always returned; mint one so tool results
                // can refer back
                function_call
                    .id
                    .unwrap_or_else(|| ident::random_alphanumeric(10)),
                name,
                function_call.args.unwrap_or_else(|| json!({})),
            ));
        }
    }
    Ok(mapped)
}

fn map_parts_to_deltas(
    parts: Vec<api::GooglePart>,
    seen: &[ContentDelta],
) -> ModelResult<Vec<ContentDelta>> {
    let mut deltas: Vec<ContentDelta> = Vec::new();
    for part in map_parts(parts)? {
        let part_delta = part_to_delta(part)?;
        let combined: Vec<ContentDelta> = seen.iter().chain(deltas.iter()).cloned().collect();
        let index = infer_delta_index(&part_delta, &combined, None);
        deltas.push(ContentDelta {
            index,
            part: part_delta,
        });
    }
    Ok(deltas)
}

fn map_usage(metadata: &api::UsageMetadata) -> ModelUsage {
    ModelUsage {
        input_tokens: metadata.prompt_token_count.unwrap_or(0),
        output_tokens: metadata.candidates_token_count.unwrap_or(0),
        input_tokens_details: map_modality_details(
            metadata.prompt_tokens_details.as_deref(),
            metadata.cache_tokens_details.as_deref(),
        ),
        output_tokens_details: map_modality_details(
            metadata.candidates_tokens_details.as_deref(),
            None,
        ),
    }
}

fn map_modality_details(
    details: Option<&[api::ModalityTokenCount]>,
    cached: Option<&[api::ModalityTokenCount]>,
) -> Option<ModelTokensDetails> {
    if details.is_none() && cached.is_none() {
        return None;
    }

    let mut mapped = ModelTokensDetails::default();
    for detail in details.unwrap_or_default() {
        let (Some(modality), Some(count)) = (&detail.modality, detail.token_count) else {
            continue;
        };
        let slot = match modality.as_str() {
            "TEXT" => &mut mapped.text_tokens,
            "AUDIO" => &mut mapped.audio_tokens,
            "IMAGE" => &mut mapped.image_tokens,
            _ => continue,
        };
        *slot = Some(slot.unwrap_or(0) + count);
    }
    for detail in cached.unwrap_or_default() {
        let (Some(modality), Some(count)) = (&detail.modality, detail.token_count) else {
            continue;
        };
        let slot = match modality.as_str() {
            "TEXT" => &mut mapped.cached_text_tokens,
            "AUDIO" => &mut mapped.cached_audio_tokens,
            "IMAGE" => &mut mapped.cached_image_tokens,
            _ => continue,
        };
        *slot = Some(slot.unwrap_or(0) + count);
    }

    Some(mapped)
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
    fn system_prompt_becomes_system_instruction() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.system_prompt = Some("Be terse.".into());
        let payload = build_generate_request(&input).unwrap();
        assert_eq!(
            payload["systemInstruction"]["parts"][0]["text"],
            "Be terse."
        );
        assert_eq!(payload["contents"][0]["role"], "user");
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let input = input_with(vec![
            Message::user(["Hi"]),
            Message::assistant(["Hello"]),
        ]);
        let payload = build_generate_request(&input).unwrap();
        assert_eq!(payload["contents"][1]["role"], "model");
    }

    #[test]
    fn reasoning_options_map_to_thinking_config() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.reasoning = Some(crate::ReasoningOptions::enabled().with_budget(512));
        let payload = build_generate_request(&input).unwrap();
        assert_eq!(
            payload["generationConfig"]["thinkingConfig"],
            json!({"includeThoughts": true, "thinkingBudget": 512})
        );
    }

    #[test]
    fn reasoning_parts_carry_thought_flag_and_signature() {
        let input = input_with(vec![Message::assistant([Part::Reasoning(
            ReasoningPart::new("hm").with_signature("sig"),
        )])]);
        let payload = build_generate_request(&input).unwrap();
        assert_eq!(
            payload["contents"][0]["parts"][0],
            json!({"text": "hm", "thought": true, "thoughtSignature": "sig"})
        );
    }

    #[test]
    fn error_tool_results_use_the_error_key() {
        let result = crate::ToolResultPart::new("c1", "wx", vec![Part::text("boom")])
            .with_is_error(true);
        let input = input_with(vec![Message::tool([Part::ToolResult(result)])]);
        let payload = build_generate_request(&input).unwrap();
        let response = &payload["contents"][0]["parts"][0]["functionResponse"]["response"];
        assert_eq!(response["error"], json!({"data": "boom"}));
    }

    #[test]
    fn tool_calls_and_reasoning_in_user_messages_are_invalid() {
        let input = input_with(vec![Message::user([Part::tool_call(
            "c1",
            "wx",
            json!({}),
        )])]);
        assert!(matches!(
            build_generate_request(&input),
            Err(ModelError::InvalidInput(_))
        ));

        let input = input_with(vec![Message::user([Part::reasoning("hm")])]);
        assert!(matches!(
            build_generate_request(&input),
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
            build_generate_request(&input),
            Err(ModelError::Unsupported(PROVIDER, _))
        ));
    }

    #[test]
    fn named_tool_choice_uses_any_with_allowlist() {
        let mut input = input_with(vec![Message::user(["Hi"])]);
        input.tool_choice = Some(ToolChoiceOption::Tool(crate::ToolChoiceTool {
            tool_name: "wx".into(),
        }));
        let payload = build_generate_request(&input).unwrap();
        assert_eq!(
            payload["toolConfig"]["functionCallingConfig"],
            json!({"mode": "ANY", "allowedFunctionNames": ["wx"]})
        );
    }

    #[test]
    fn missing_function_call_ids_are_minted() {
        let parts = vec![api::GooglePart {
            function_call: Some(api::FunctionCall {
                id: None,
                name: Some("wx".into()),
                args: Some(json!({"c": "NYC"})),
            }),
            ..Default::default()
        }];
        let mapped = map_parts(parts).unwrap();
        let Part::ToolCall(tool_call) = &mapped[0] else {
            panic!("expected tool call");
        };
        assert_eq!(tool_call.tool_call_id.len(), 10);
        assert_eq!(tool_call.tool_name, "wx");
    }

    #[test]
    fn thought_parts_map_to_reasoning() {
        let parts = vec![
            api::GooglePart {
                text: Some("thinking...".into()),
                thought: Some(true),
                thought_signature: Some("sig".into()),
                ..Default::default()
            },
            api::GooglePart {
                text: Some("Answer.".into()),
                ..Default::default()
            },
        ];
        let mapped = map_parts(parts).unwrap();
        assert_eq!(
            mapped,
            vec![
                Part::Reasoning(ReasoningPart::new("thinking...").with_signature("sig")),
                Part::text("Answer."),
            ]
        );
    }

    #[test]
    fn unindexed_stream_parts_get_oracle_indices() {
        let mut seen: Vec<ContentDelta> = Vec::new();
        let first = map_parts_to_deltas(
            vec![api::GooglePart {
                text: Some("Hel".into()),
                ..Default::default()
            }],
            &seen,
        )
        .unwrap();
        seen.extend(first.clone());
        let second = map_parts_to_deltas(
            vec![
                api::GooglePart {
                    text: Some("lo".into()),
                    ..Default::default()
                },
                api::GooglePart {
                    function_call: Some(api::FunctionCall {
                        id: Some("c1".into()),
                        name: Some("wx".into()),
                        args: Some(json!({})),
                    }),
                    ..Default::default()
                },
            ],
            &seen,
        )
        .unwrap();

        assert_eq!(first[0].index, 0);
        assert_eq!(second[0].index, 0);
        assert_eq!(second[1].index, 1);
    }

    #[test]
    fn modality_token_details_are_split() {
        let metadata = api::UsageMetadata {
            prompt_token_count: Some(10),
            candidates_token_count: Some(5),
            prompt_tokens_details: Some(vec![
                api::ModalityTokenCount {
                    modality: Some("TEXT".into()),
                    token_count: Some(8),
                },
                api::ModalityTokenCount {
                    modality: Some("AUDIO".into()),
                    token_count: Some(2),
                },
            ]),
            candidates_tokens_details: None,
            cache_tokens_details: None,
        };
        let usage = map_usage(&metadata);
        let details = usage.input_tokens_details.unwrap();
        assert_eq!(details.text_tokens, Some(8));
        assert_eq!(details.audio_tokens, Some(2));
        assert!(usage.output_tokens_details.is_none());
    }
}
