use serde::{Deserialize, Serialize};

/// Which adapter a configured LLM provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
}

/// One configured LLM provider: id, adapter kind, endpoint, model, auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Env var name holding the API key; read at startup, never stored in
    /// config files.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LlmConfig {
    pub providers: Vec<LlmProviderConfig>,
    /// Provider id to use for deterministic-mode calls (extraction, judge).
    /// Falls back to the first configured provider when unset.
    pub deterministic_provider: Option<String>,
    /// Provider id to use for compositional-mode calls (section generation).
    /// Falls back to the first configured provider when unset.
    pub compositional_provider: Option<String>,
}
