//! An Anthropic-messages-API-compatible provider adapter.

use async_trait::async_trait;
use ce_domain::config::LlmProviderConfig;
use ce_domain::{Error, Result};
use serde_json::json;

use crate::traits::{CompletionUsage, JsonCompletionRequest, LlmProvider, TextCompletionRequest, TextCompletionResponse};

pub struct AnthropicProvider {
    id: String,
    model: String,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &LlmProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
        Ok(Self {
            id: cfg.id.clone(),
            model: cfg.model.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            http: reqwest::Client::new(),
        })
    }

    async fn messages(&self, system: &str, prompt: &str, temperature: f32, max_tokens: u32) -> Result<TextCompletionResponse> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::DependencyUnavailable {
                component: "llm".to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::DependencyUnavailable {
                component: "llm".to_string(),
                message: format!("http {status}: {text}"),
            });
        }

        let value: serde_json::Value = resp.json().await?;
        let content = value["content"][0]["text"]
            .as_str()
            .ok_or_else(|| Error::LlmInvalidOutput("missing content[0].text".to_string()))?
            .to_string();

        let usage = CompletionUsage {
            prompt_tokens: value["usage"]["input_tokens"].as_u64().map(|n| n as u32),
            completion_tokens: value["usage"]["output_tokens"].as_u64().map(|n| n as u32),
        };

        Ok(TextCompletionResponse { content, usage })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete_json(&self, request: JsonCompletionRequest) -> Result<serde_json::Value> {
        let json_instruction = format!(
            "{}\n\nRespond with JSON only, no prose, no markdown fencing.",
            request.prompt
        );
        let resp = self
            .messages(&request.system, &json_instruction, 0.0, request.max_tokens)
            .await?;
        serde_json::from_str(&resp.content)
            .map_err(|e| Error::LlmInvalidOutput(format!("response was not valid JSON: {e}")))
    }

    async fn complete_text(&self, request: TextCompletionRequest) -> Result<TextCompletionResponse> {
        self.messages(&request.system, &request.prompt, request.temperature, request.max_tokens)
            .await
    }
}
