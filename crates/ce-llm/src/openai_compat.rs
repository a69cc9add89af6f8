//! An OpenAI-chat-completions-compatible provider adapter.

use async_trait::async_trait;
use ce_domain::config::LlmProviderConfig;
use ce_domain::{Error, Result};
use serde_json::json;

use crate::traits::{CompletionUsage, JsonCompletionRequest, LlmProvider, TextCompletionRequest, TextCompletionResponse};

pub struct OpenAiCompatProvider {
    id: String,
    model: String,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
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

    async fn chat(&self, system: &str, prompt: &str, temperature: f32, max_tokens: u32, json_mode: bool) -> Result<TextCompletionResponse> {
        let mut body = json!({
            "model": self.model,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::LlmInvalidOutput("missing choices[0].message.content".to_string()))?
            .to_string();

        let usage = CompletionUsage {
            prompt_tokens: value["usage"]["prompt_tokens"].as_u64().map(|n| n as u32),
            completion_tokens: value["usage"]["completion_tokens"].as_u64().map(|n| n as u32),
        };

        Ok(TextCompletionResponse { content, usage })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete_json(&self, request: JsonCompletionRequest) -> Result<serde_json::Value> {
        let resp = self
            .chat(&request.system, &request.prompt, 0.0, request.max_tokens, true)
            .await?;
        serde_json::from_str(&resp.content)
            .map_err(|e| Error::LlmInvalidOutput(format!("response was not valid JSON: {e}")))
    }

    async fn complete_text(&self, request: TextCompletionRequest) -> Result<TextCompletionResponse> {
        self.chat(&request.system, &request.prompt, request.temperature, request.max_tokens, false)
            .await
    }
}
