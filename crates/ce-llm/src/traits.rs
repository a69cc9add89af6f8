use async_trait::async_trait;
use ce_domain::Result;
use serde::{Deserialize, Serialize};

/// A deterministic-mode (temperature 0, schema-enforced JSON) completion
/// request — used for extraction and the validation judge (§4.7).
#[derive(Debug, Clone, Serialize)]
pub struct JsonCompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// A compositional-mode (temperature <= 0.3, structured output) completion
/// request — used for section generation (§4.7).
#[derive(Debug, Clone, Serialize)]
pub struct TextCompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TextCompletionResponse {
    pub content: String,
    pub usage: CompletionUsage,
}

/// The capability interface duck-typed LLM clients collapse into (§9):
/// `{complete_json, complete_text}`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;
    fn model(&self) -> &str;

    /// Deterministic JSON-schema-enforced completion.
    async fn complete_json(&self, request: JsonCompletionRequest) -> Result<serde_json::Value>;

    /// Compositional free-form completion with a target structured shape
    /// described in the prompt; the caller parses `content` as JSON.
    async fn complete_text(&self, request: TextCompletionRequest) -> Result<TextCompletionResponse>;
}
