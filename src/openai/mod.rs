mod chat;
mod chat_api;
mod responses;
mod responses_api;

pub use chat::{OpenAiChatModel, OpenAiChatOptions};
pub use responses::{OpenAiResponsesModel, OpenAiResponsesOptions};

/// Sentinel budgets accepted by OpenAI reasoning. OpenAI exposes discrete
/// effort levels rather than token budgets; these values select one.
pub const OPENAI_REASONING_EFFORT_MINIMAL: u32 = 1000;
pub const OPENAI_REASONING_EFFORT_LOW: u32 = 2000;
pub const OPENAI_REASONING_EFFORT_MEDIUM: u32 = 3000;
pub const OPENAI_REASONING_EFFORT_HIGH: u32 = 4000;

pub(crate) fn reasoning_effort_for_budget(
    budget_tokens: u32,
    provider: &'static str,
) -> crate::ModelResult<&'static str> {
    match budget_tokens {
        OPENAI_REASONING_EFFORT_MINIMAL => Ok("minimal"),
        OPENAI_REASONING_EFFORT_LOW => Ok("low"),
        OPENAI_REASONING_EFFORT_MEDIUM => Ok("medium"),
        OPENAI_REASONING_EFFORT_HIGH => Ok("high"),
        other => Err(crate::ModelError::Unsupported(
            provider,
            format!(
                "budget_tokens {other} does not map to an OpenAI reasoning effort; use the \
                 OPENAI_REASONING_EFFORT_* sentinels"
            ),
        )),
    }
}
