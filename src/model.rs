use crate::{
    LanguageModelInput, ModelCapability, ModelPricing, ModelResponse, ModelResult,
    PartialModelResponse,
};
use futures::{stream::BoxStream, Stream};
use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// Static facts about a model: what it can do and what it costs.
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    pub capabilities: Option<Vec<ModelCapability>>,
    pub pricing: Option<ModelPricing>,
}

/// The unified model contract. One implementation per provider API; both
/// operations translate the canonical input into the vendor wire shape and
/// back.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider(&self) -> &'static str;
    fn model_id(&self) -> String;
    fn metadata(&self) -> Option<&ModelMetadata>;
    /// One request, one complete response.
    async fn generate(&self, input: LanguageModelInput) -> ModelResult<ModelResponse>;
    /// One request, a pull-based sequence of partial responses. Dropping
    /// the stream cancels the in-flight request.
    async fn stream(&self, input: LanguageModelInput) -> ModelResult<ModelStream>;
}

/// The boxed partial-response sequence returned by [`LanguageModel::stream`].
pub struct ModelStream(BoxStream<'static, ModelResult<PartialModelResponse>>);

impl std::fmt::Debug for ModelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStream").finish_non_exhaustive()
    }
}

impl ModelStream {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = ModelResult<PartialModelResponse>> + Send + 'static,
    {
        Self(Box::pin(stream))
    }
}

impl Stream for ModelStream {
    type Item = ModelResult<PartialModelResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.as_mut().poll_next(cx)
    }
}
