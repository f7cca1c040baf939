//! Optional call observation. No module-level tracer: a telemetry handle
//! is injected through each model's options, and its absence disables
//! observation entirely.

use crate::{
    LanguageModelInput, ModelError, ModelResponse, ModelResult, ModelStream, ModelUsage,
    PartialModelResponse,
};
use futures::StreamExt;
use opentelemetry::trace::Status;
use std::{future::Future, sync::Arc, time::Instant};
use tracing::{info_span, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Which facade operation a call came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Generate,
    Stream,
}

impl CallKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Stream => "stream",
        }
    }
}

/// Receives the lifecycle of one model call. `on_end` fires exactly once,
/// after the response, the final stream item, or the error.
pub trait CallObserver: Send {
    fn on_response(&mut self, _response: &ModelResponse) {}
    fn on_partial(&mut self, _partial: &PartialModelResponse) {}
    fn on_error(&mut self, _error: &ModelError) {}
    fn on_end(&mut self) {}
}

/// The telemetry handle a model accepts at construction.
pub trait ModelTelemetry: Send + Sync {
    fn start_call(
        &self,
        provider: &'static str,
        model_id: &str,
        kind: CallKind,
        input: &LanguageModelInput,
    ) -> Box<dyn CallObserver>;
}

/// OpenTelemetry-backed telemetry following the GenAI semantic
/// conventions, recorded through the ambient `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelTelemetry;

impl ModelTelemetry for OtelTelemetry {
    fn start_call(
        &self,
        provider: &'static str,
        model_id: &str,
        kind: CallKind,
        input: &LanguageModelInput,
    ) -> Box<dyn CallObserver> {
        let span = match kind {
            CallKind::Generate => info_span!("parlance.generate"),
            CallKind::Stream => info_span!("parlance.stream"),
        };
        span.set_attribute("gen_ai.operation.name", "generate_content");
        span.set_attribute("gen_ai.provider.name", provider.to_string());
        span.set_attribute("gen_ai.request.model", model_id.to_string());
        span.set_attribute("parlance.method", kind.as_str());
        if let Some(max_tokens) = input.max_tokens {
            span.set_attribute("gen_ai.request.max_tokens", i64::from(max_tokens));
        }
        if let Some(temperature) = input.temperature {
            span.set_attribute("gen_ai.request.temperature", temperature);
        }
        if let Some(top_p) = input.top_p {
            span.set_attribute("gen_ai.request.top_p", top_p);
        }
        if let Some(top_k) = input.top_k {
            span.set_attribute("gen_ai.request.top_k", i64::from(top_k));
        }
        if let Some(presence_penalty) = input.presence_penalty {
            span.set_attribute("gen_ai.request.presence_penalty", presence_penalty);
        }
        if let Some(frequency_penalty) = input.frequency_penalty {
            span.set_attribute("gen_ai.request.frequency_penalty", frequency_penalty);
        }
        if let Some(seed) = input.seed {
            span.set_attribute("gen_ai.request.seed", seed);
        }

        Box::new(OtelCallObserver {
            span,
            started: Instant::now(),
            time_to_first_token: None,
            usage: None,
            cost: None,
            ended: false,
        })
    }
}

struct OtelCallObserver {
    span: Span,
    started: Instant,
    time_to_first_token: Option<f64>,
    usage: Option<ModelUsage>,
    cost: Option<f64>,
    ended: bool,
}

impl CallObserver for OtelCallObserver {
    fn on_response(&mut self, response: &ModelResponse) {
        if let Some(usage) = &response.usage {
            self.usage = Some(usage.clone());
        }
        if let Some(cost) = response.cost {
            self.cost = Some(cost);
        }
    }

    fn on_partial(&mut self, partial: &PartialModelResponse) {
        if let Some(usage) = &partial.usage {
            self.usage.get_or_insert_with(ModelUsage::default).add(usage);
        }
        if let Some(cost) = partial.cost {
            *self.cost.get_or_insert(0.0) += cost;
        }
        if partial.delta.is_some() && self.time_to_first_token.is_none() {
            self.time_to_first_token = Some(self.started.elapsed().as_secs_f64());
        }
    }

    fn on_error(&mut self, error: &ModelError) {
        self.span.set_attribute("exception.message", error.to_string());
        self.span.set_status(Status::error(error.to_string()));
    }

    fn on_end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        if let Some(usage) = &self.usage {
            self.span
                .set_attribute("gen_ai.usage.input_tokens", i64::from(usage.input_tokens));
            self.span
                .set_attribute("gen_ai.usage.output_tokens", i64::from(usage.output_tokens));
        }
        if let Some(cost) = self.cost {
            self.span.set_attribute("parlance.cost", cost);
        }
        if let Some(ttft) = self.time_to_first_token {
            self.span
                .set_attribute("gen_ai.server.time_to_first_token", ttft);
        }
    }
}

impl Drop for OtelCallObserver {
    fn drop(&mut self) {
        self.on_end();
    }
}

/// Runs a `generate` body under the optional telemetry handle.
pub(crate) async fn observe_generate<F, Fut>(
    telemetry: Option<&Arc<dyn ModelTelemetry>>,
    provider: &'static str,
    model_id: &str,
    input: LanguageModelInput,
    f: F,
) -> ModelResult<ModelResponse>
where
    F: FnOnce(LanguageModelInput) -> Fut,
    Fut: Future<Output = ModelResult<ModelResponse>>,
{
    let Some(telemetry) = telemetry else {
        return f(input).await;
    };

    let mut observer = telemetry.start_call(provider, model_id, CallKind::Generate, &input);
    let result = f(input).await;
    match &result {
        Ok(response) => observer.on_response(response),
        Err(error) => observer.on_error(error),
    }
    observer.on_end();
    result
}

/// Runs a `stream` body under the optional telemetry handle, observing
/// every yielded partial until the stream ends or errors.
pub(crate) async fn observe_stream<F, Fut>(
    telemetry: Option<&Arc<dyn ModelTelemetry>>,
    provider: &'static str,
    model_id: &str,
    input: LanguageModelInput,
    f: F,
) -> ModelResult<ModelStream>
where
    F: FnOnce(LanguageModelInput) -> Fut,
    Fut: Future<Output = ModelResult<ModelStream>>,
{
    let Some(telemetry) = telemetry else {
        return f(input).await;
    };

    let mut observer = telemetry.start_call(provider, model_id, CallKind::Stream, &input);
    match f(input).await {
        Ok(mut inner) => {
            let observed = async_stream::try_stream! {
                while let Some(item) = inner.next().await {
                    match item {
                        Ok(partial) => {
                            observer.on_partial(&partial);
                            yield partial;
                        }
                        Err(error) => {
                            observer.on_error(&error);
                            observer.on_end();
                            Err(error)?;
                        }
                    }
                }
                observer.on_end();
            };
            Ok(ModelStream::from_stream(observed))
        }
        Err(error) => {
            observer.on_error(&error);
            observer.on_end();
            Err(error)
        }
    }
}
