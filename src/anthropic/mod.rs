mod api;
mod model;

pub use model::{AnthropicModel, AnthropicOptions};
