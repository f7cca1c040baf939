use crate::{
    anthropic::{AnthropicModel, AnthropicOptions},
    cohere::{CohereModel, CohereOptions},
    google::{GoogleModel, GoogleOptions},
    mistral::{MistralModel, MistralOptions},
    openai::{
        OpenAiChatModel, OpenAiChatOptions, OpenAiResponsesModel, OpenAiResponsesOptions,
    },
    telemetry::ModelTelemetry,
    LanguageModel, ModelMetadata,
};
use std::{collections::HashMap, sync::Arc};

/// The provider APIs this library speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenaiChat,
    OpenaiResponses,
    Anthropic,
    Google,
    Cohere,
    Mistral,
}

/// Provider-independent construction options for [`new_model`].
#[derive(Clone, Default)]
pub struct ModelOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    /// Anthropic only; other providers ignore it.
    pub api_version: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub client: Option<reqwest::Client>,
    pub telemetry: Option<Arc<dyn ModelTelemetry>>,
    pub metadata: Option<ModelMetadata>,
}

/// Builds a model handle for any supported provider from one option set.
/// The per-provider constructors remain available for provider-specific
/// tuning.
#[must_use]
pub fn new_model(
    provider: ProviderKind,
    model_id: impl Into<String>,
    options: ModelOptions,
) -> Box<dyn LanguageModel> {
    let ModelOptions {
        api_key,
        base_url,
        api_version,
        headers,
        client,
        telemetry,
        metadata,
    } = options;

    match provider {
        ProviderKind::OpenaiChat => {
            let mut model = OpenAiChatModel::new(
                model_id,
                OpenAiChatOptions {
                    api_key,
                    base_url,
                    headers,
                    client,
                    telemetry,
                },
            );
            if let Some(metadata) = metadata {
                model = model.with_metadata(metadata);
            }
            Box::new(model)
        }
        ProviderKind::OpenaiResponses => {
            let mut model = OpenAiResponsesModel::new(
                model_id,
                OpenAiResponsesOptions {
                    api_key,
                    base_url,
                    headers,
                    client,
                    telemetry,
                },
            );
            if let Some(metadata) = metadata {
                model = model.with_metadata(metadata);
            }
            Box::new(model)
        }
        ProviderKind::Anthropic => {
            let mut model = AnthropicModel::new(
                model_id,
                AnthropicOptions {
                    api_key,
                    base_url,
                    api_version,
                    headers,
                    client,
                    telemetry,
                },
            );
            if let Some(metadata) = metadata {
                model = model.with_metadata(metadata);
            }
            Box::new(model)
        }
        ProviderKind::Google => {
            let mut model = GoogleModel::new(
                model_id,
                GoogleOptions {
                    api_key,
                    base_url,
                    headers,
                    client,
                    telemetry,
                },
            );
            if let Some(metadata) = metadata {
                model = model.with_metadata(metadata);
            }
            Box::new(model)
        }
        ProviderKind::Cohere => {
            let mut model = CohereModel::new(
                model_id,
                CohereOptions {
                    api_key,
                    base_url,
                    headers,
                    client,
                    telemetry,
                },
            );
            if let Some(metadata) = metadata {
                model = model.with_metadata(metadata);
            }
            Box::new(model)
        }
        ProviderKind::Mistral => {
            let mut model = MistralModel::new(
                model_id,
                MistralOptions {
                    api_key,
                    base_url,
                    headers,
                    client,
                    telemetry,
                },
            );
            if let Some(metadata) = metadata {
                model = model.with_metadata(metadata);
            }
            Box::new(model)
        }
    }
}
