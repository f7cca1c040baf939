//! parlance: a multi-provider language model client.
//!
//! One canonical content model, one `generate`/`stream` contract, and a
//! bidirectional adapter per provider API (OpenAI Chat Completions and
//! Responses, Anthropic Messages, Google Gemini, Cohere v2, Mistral).
//! Streaming deltas from any provider reconcile into indexed fragments
//! that [`StreamAccumulator`] folds back into the exact shape `generate`
//! would have returned.

mod accumulator;
mod content;
pub mod delta;
mod error;
pub mod flatten;
mod ident;
mod model;
pub mod pcm;
mod registry;
mod request;
mod response;
pub mod telemetry;
pub mod testing;
mod transport;
mod usage;

pub mod anthropic;
pub mod cohere;
pub mod google;
pub mod mistral;
pub mod openai;

pub use accumulator::StreamAccumulator;
pub use content::*;
pub use error::{ModelError, ModelResult};
pub use model::{LanguageModel, ModelMetadata, ModelStream};
pub use registry::{new_model, ModelOptions, ProviderKind};
pub use request::*;
pub use response::*;
