//! LLM Client — deterministic and compositional completion modes (§4.7),
//! with a retrying, capability-neutral router in front of a small provider
//! registry.

pub mod anthropic;
pub mod openai_compat;
pub mod registry;
pub mod router;
pub mod traits;

pub use registry::ProviderRegistry;
pub use router::LlmRouter;
pub use traits::{
    CompletionUsage, JsonCompletionRequest, LlmProvider, TextCompletionRequest,
    TextCompletionResponse,
};
