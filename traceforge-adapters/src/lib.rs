//! Per-provider upstream adapters (§4.9): one dialect per module, each
//! normalizing to the OpenAI chat-completion shape defined in `traceforge_core::trace`.

pub mod adapter;
pub mod providers;

pub use adapter::{Adapter, ByteStream, DispatchResult, UPSTREAM_DEADLINE};
pub use providers::anthropic::AnthropicAdapter;
pub use providers::gemini::GeminiAdapter;
pub use providers::ollama::OllamaAdapter;
pub use providers::openai::OpenAiAdapter;
