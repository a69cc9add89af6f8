//! Provider registry — constructs and holds configured [`LlmProvider`]
//! instances from [`LlmConfig`] (§4.7).

use std::collections::HashMap;
use std::sync::Arc;

use ce_domain::config::{LlmConfig, ProviderKind};
use ce_domain::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

/// Holds all instantiated LLM providers, in configured order (the order
/// used for fallback when the primary/selected provider is unavailable).
pub struct ProviderRegistry {
    order: Vec<String>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    /// Build the registry from configuration. A provider that fails to
    /// construct is logged and skipped rather than aborting startup; an
    /// empty registry is valid (the engine boots, generation fails until a
    /// provider is added).
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut order = Vec::new();
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        for pc in &config.providers {
            let built: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_config(pc).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match built {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    order.push(pc.id.clone());
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(provider_id = %pc.id, kind = ?pc.kind, error = %e, "failed to initialize LLM provider, skipping");
                }
            }
        }

        Ok(Self { order, providers })
    }

    /// Build a registry directly from already-constructed providers, in
    /// the given order. Useful for tests and for callers that build
    /// providers outside the `LlmConfig` path.
    pub fn from_providers(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        let mut order = Vec::with_capacity(providers.len());
        let mut map = HashMap::with_capacity(providers.len());
        for p in providers {
            order.push(p.provider_id().to_string());
            map.insert(p.provider_id().to_string(), p);
        }
        Self { order, providers: map }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Providers in configured order, for fallback iteration.
    pub fn ordered(&self) -> Vec<Arc<dyn LlmProvider>> {
        self.order
            .iter()
            .filter_map(|id| self.providers.get(id).cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Resolve a provider by explicit id, falling back to the first
    /// registered provider (configured order) when `id` is `None`.
    pub fn resolve(&self, id: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        if let Some(id) = id {
            return self.get(id).ok_or_else(|| {
                Error::Config(format!("no LLM provider registered with id '{id}'"))
            });
        }
        self.order
            .first()
            .and_then(|id| self.get(id))
            .ok_or_else(|| Error::Config("no LLM providers registered".to_string()))
    }
}
