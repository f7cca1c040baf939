use thiserror::Error;

/// Errors surfaced by the unified model contract.
///
/// Provider-tagged variants carry the provider name first so the caller can
/// tell which backend rejected the call when models are mixed.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The input itself is malformed (e.g. a tool message carrying a
    /// non-tool-result part, or an empty tool name).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The input uses a capability the selected provider or model cannot
    /// express (e.g. audio input to Anthropic).
    #[error("unsupported by {0}: {1}")]
    Unsupported(&'static str, String),
    /// The request could not be sent or the body could not be read.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The provider returned a non-success status code.
    #[error("status {0}: {1}")]
    StatusCode(reqwest::StatusCode, String),
    /// The provider response violated an expectation of its own contract
    /// (no choices, unparsable tool arguments, malformed stream chunk).
    #[error("invariant violated ({0}): {1}")]
    Invariant(&'static str, String),
    /// The provider reported a policy refusal. Carries the refusal text.
    #[error("refusal: {0}")]
    Refusal(String),
    /// A known vendor construct this library deliberately does not handle
    /// yet. Reported rather than silently discarded.
    #[error("not implemented ({0}): {1}")]
    NotImplemented(&'static str, String),
}

pub type ModelResult<T> = Result<T, ModelError>;
