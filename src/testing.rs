//! A scriptable in-memory model for exercising callers of the
//! [`LanguageModel`] contract without a network.

use crate::{
    LanguageModel, LanguageModelInput, ModelError, ModelMetadata, ModelResponse, ModelResult,
    ModelStream, PartialModelResponse,
};
use futures::stream;
use std::{collections::VecDeque, sync::Mutex};

/// One scripted outcome for a `generate` call.
pub enum ScriptedGenerate {
    Response(ModelResponse),
    Error(ModelError),
}

impl From<ModelResponse> for ScriptedGenerate {
    fn from(response: ModelResponse) -> Self {
        Self::Response(response)
    }
}

impl From<ModelError> for ScriptedGenerate {
    fn from(error: ModelError) -> Self {
        Self::Error(error)
    }
}

/// One scripted outcome for a `stream` call.
pub enum ScriptedStream {
    Partials(Vec<PartialModelResponse>),
    Error(ModelError),
}

impl From<Vec<PartialModelResponse>> for ScriptedStream {
    fn from(partials: Vec<PartialModelResponse>) -> Self {
        Self::Partials(partials)
    }
}

impl From<ModelError> for ScriptedStream {
    fn from(error: ModelError) -> Self {
        Self::Error(error)
    }
}

#[derive(Default)]
struct MockState {
    generate_script: VecDeque<ScriptedGenerate>,
    stream_script: VecDeque<ScriptedStream>,
    generate_inputs: Vec<LanguageModelInput>,
    stream_inputs: Vec<LanguageModelInput>,
}

/// Replays scripted outcomes and records every input it was handed.
pub struct MockLanguageModel {
    provider: &'static str,
    model_id: String,
    metadata: Option<ModelMetadata>,
    state: Mutex<MockState>,
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self {
            provider: "mock",
            model_id: "mock-model".to_string(),
            metadata: None,
            state: Mutex::new(MockState::default()),
        }
    }
}

impl MockLanguageModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metadata(&mut self, metadata: Option<ModelMetadata>) {
        self.metadata = metadata;
    }

    /// Queues the outcome of the next un-scripted `generate` call.
    pub fn script_generate(&self, outcome: impl Into<ScriptedGenerate>) -> &Self {
        self.state
            .lock()
            .expect("mock state poisoned")
            .generate_script
            .push_back(outcome.into());
        self
    }

    /// Queues the outcome of the next un-scripted `stream` call.
    pub fn script_stream(&self, outcome: impl Into<ScriptedStream>) -> &Self {
        self.state
            .lock()
            .expect("mock state poisoned")
            .stream_script
            .push_back(outcome.into());
        self
    }

    /// Inputs recorded by `generate`, in call order.
    #[must_use]
    pub fn generate_inputs(&self) -> Vec<LanguageModelInput> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .generate_inputs
            .clone()
    }

    /// Inputs recorded by `stream`, in call order.
    #[must_use]
    pub fn stream_inputs(&self) -> Vec<LanguageModelInput> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .stream_inputs
            .clone()
    }

    /// Forgets recorded inputs, keeping any unplayed script entries.
    pub fn reset_inputs(&self) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.generate_inputs.clear();
        state.stream_inputs.clear();
    }

    /// Drops everything: scripts and recorded inputs.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("mock state poisoned");
        *state = MockState::default();
    }
}

#[async_trait::async_trait]
impl LanguageModel for MockLanguageModel {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn model_id(&self) -> String {
        self.model_id.clone()
    }

    fn metadata(&self) -> Option<&ModelMetadata> {
        self.metadata.as_ref()
    }

    async fn generate(&self, input: LanguageModelInput) -> ModelResult<ModelResponse> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.generate_inputs.push(input);
        let outcome = state.generate_script.pop_front().ok_or_else(|| {
            ModelError::Invariant(self.provider, "no scripted generate outcome left".to_string())
        })?;
        match outcome {
            ScriptedGenerate::Response(response) => Ok(response),
            ScriptedGenerate::Error(error) => Err(error),
        }
    }

    async fn stream(&self, input: LanguageModelInput) -> ModelResult<ModelStream> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.stream_inputs.push(input);
        let outcome = state.stream_script.pop_front().ok_or_else(|| {
            ModelError::Invariant(self.provider, "no scripted stream outcome left".to_string())
        })?;
        match outcome {
            ScriptedStream::Partials(partials) => Ok(ModelStream::from_stream(stream::iter(
                partials.into_iter().map(Ok),
            ))),
            ScriptedStream::Error(error) => Err(error),
        }
    }
}
