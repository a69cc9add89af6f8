//! Retrying, fallback-aware router in front of the provider registry.
//!
//! Retries, timeouts, and fallback are explicitly the caller's
//! responsibility per §4.7; this is that caller. Exponential backoff with
//! jitter, default 3 attempts, capped at 30s, per-call timeout `T_llm`.

use std::sync::Arc;
use std::time::Duration;

use ce_domain::config::{RetryConfig, TimeoutsConfig};
use ce_domain::trace::TraceEvent;
use ce_domain::{Error, Result};
use rand::Rng;

use crate::registry::ProviderRegistry;
use crate::traits::{JsonCompletionRequest, LlmProvider, TextCompletionRequest, TextCompletionResponse};

pub struct LlmRouter {
    registry: ProviderRegistry,
    retry: RetryConfig,
    llm_timeout: Duration,
    deterministic_provider: Option<String>,
    compositional_provider: Option<String>,
}

impl LlmRouter {
    pub fn new(
        registry: ProviderRegistry,
        retry: RetryConfig,
        timeouts: &TimeoutsConfig,
        deterministic_provider: Option<String>,
        compositional_provider: Option<String>,
    ) -> Self {
        Self {
            registry,
            retry,
            llm_timeout: Duration::from_secs(timeouts.llm_timeout_sec),
            deterministic_provider,
            compositional_provider,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.backoff_base_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = base.min(self.retry.backoff_cap_ms);
        let jitter = rand::thread_rng().gen_range(0..=capped.max(1) / 4 + 1);
        Duration::from_millis(capped.saturating_add(jitter))
    }

    /// Deterministic-mode completion (§4.4, §4.8 judge), with retry +
    /// fallback across the configured provider chain.
    pub async fn complete_json(&self, request: JsonCompletionRequest) -> Result<serde_json::Value> {
        self.run_with_fallback(self.deterministic_provider.as_deref(), "deterministic", |p, req| {
            let req = req.clone();
            Box::pin(async move { p.complete_json(req).await })
        }, request)
        .await
    }

    /// Compositional-mode completion (§4.9 section generation), with retry
    /// + fallback across the configured provider chain.
    pub async fn complete_text(&self, request: TextCompletionRequest) -> Result<TextCompletionResponse> {
        self.run_with_fallback(self.compositional_provider.as_deref(), "compositional", |p, req| {
            let req = req.clone();
            Box::pin(async move { p.complete_text(req).await })
        }, request)
        .await
    }

    async fn run_with_fallback<Req, Resp, F>(
        &self,
        preferred: Option<&str>,
        mode: &str,
        call: F,
        request: Req,
    ) -> Result<Resp>
    where
        Req: Clone,
        F: Fn(
            Arc<dyn LlmProvider>,
            &Req,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Resp>> + Send>>,
    {
        if self.registry.is_empty() {
            return Err(Error::DependencyUnavailable {
                component: "llm".to_string(),
                message: "no LLM providers registered".to_string(),
            });
        }

        let mut chain = self.registry.ordered();
        if let Some(preferred) = preferred {
            if let Some(pos) = chain.iter().position(|p| p.provider_id() == preferred) {
                let p = chain.remove(pos);
                chain.insert(0, p);
            }
        }

        let mut last_err: Option<Error> = None;
        for (idx, provider) in chain.iter().enumerate() {
            if idx > 0 {
                TraceEvent::LlmFallback {
                    from_provider: last_err
                        .as_ref()
                        .map(|_| "previous".to_string())
                        .unwrap_or_default(),
                    from_model: String::new(),
                    to_provider: provider.provider_id().to_string(),
                    to_model: provider.model().to_string(),
                    reason: last_err
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default(),
                }
                .emit();
            }

            for attempt in 0..self.retry.r_max {
                let start = std::time::Instant::now();
                let outcome = tokio::time::timeout(self.llm_timeout, call(provider.clone(), &request)).await;

                let result = match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::DependencyUnavailable {
                        component: "llm".to_string(),
                        message: format!(
                            "provider '{}' exceeded llm timeout of {:?}",
                            provider.provider_id(),
                            self.llm_timeout
                        ),
                    }),
                };
                let duration_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(resp) => {
                        TraceEvent::LlmRequest {
                            provider: provider.provider_id().to_string(),
                            model: provider.model().to_string(),
                            mode: mode.to_string(),
                            duration_ms,
                            prompt_tokens: None,
                            completion_tokens: None,
                        }
                        .emit();
                        return Ok(resp);
                    }
                    Err(e) if e.is_retriable() && attempt + 1 < self.retry.r_max => {
                        tracing::warn!(
                            provider = provider.provider_id(),
                            attempt,
                            error = %e,
                            "retriable llm error, backing off"
                        );
                        last_err = Some(e);
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                        continue;
                    }
                    Err(e) => {
                        last_err = Some(e);
                        break;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::DependencyUnavailable {
            component: "llm".to_string(),
            message: "all configured providers exhausted".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        id: String,
        fails_remaining: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn provider_id(&self) -> &str {
            &self.id
        }
        fn model(&self) -> &str {
            "test-model"
        }
        async fn complete_json(&self, _request: JsonCompletionRequest) -> Result<serde_json::Value> {
            if self.fails_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(Error::DependencyUnavailable {
                    component: "llm".to_string(),
                    message: "flaky".to_string(),
                });
            }
            Ok(serde_json::json!({"ok": true}))
        }
        async fn complete_text(&self, _request: TextCompletionRequest) -> Result<TextCompletionResponse> {
            Ok(TextCompletionResponse {
                content: "generated".to_string(),
                usage: crate::traits::CompletionUsage {
                    prompt_tokens: None,
                    completion_tokens: None,
                },
            })
        }
    }

    struct AlwaysFailsProvider {
        id: String,
    }

    #[async_trait]
    impl LlmProvider for AlwaysFailsProvider {
        fn provider_id(&self) -> &str {
            &self.id
        }
        fn model(&self) -> &str {
            "test-model"
        }
        async fn complete_json(&self, _request: JsonCompletionRequest) -> Result<serde_json::Value> {
            Err(Error::DependencyUnavailable {
                component: "llm".to_string(),
                message: "down".to_string(),
            })
        }
        async fn complete_text(&self, _request: TextCompletionRequest) -> Result<TextCompletionResponse> {
            Err(Error::DependencyUnavailable {
                component: "llm".to_string(),
                message: "down".to_string(),
            })
        }
    }

    fn retry_cfg() -> RetryConfig {
        RetryConfig {
            r_max: 3,
            backoff_base_ms: 1,
            backoff_cap_ms: 5,
        }
    }

    fn timeouts_cfg() -> TimeoutsConfig {
        TimeoutsConfig {
            section_timeout_sec: 30,
            job_timeout_sec: 1200,
            llm_timeout_sec: 20,
        }
    }

    fn json_request() -> JsonCompletionRequest {
        JsonCompletionRequest {
            system: String::new(),
            prompt: String::new(),
            max_tokens: 10,
        }
    }

    #[tokio::test]
    async fn retries_succeed_after_transient_failures() {
        let provider = Arc::new(FlakyProvider {
            id: "flaky".to_string(),
            fails_remaining: AtomicUsize::new(2),
        }) as Arc<dyn LlmProvider>;
        let registry = ProviderRegistry::from_providers(vec![provider]);
        let router = LlmRouter::new(registry, retry_cfg(), &timeouts_cfg(), None, None);

        let result = router.complete_json(json_request()).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_after_exhausting_retries() {
        let dead = Arc::new(AlwaysFailsProvider { id: "dead".to_string() }) as Arc<dyn LlmProvider>;
        let healthy = Arc::new(FlakyProvider {
            id: "healthy".to_string(),
            fails_remaining: AtomicUsize::new(0),
        }) as Arc<dyn LlmProvider>;
        let registry = ProviderRegistry::from_providers(vec![dead, healthy]);
        let router = LlmRouter::new(registry, retry_cfg(), &timeouts_cfg(), None, None);

        let result = router.complete_json(json_request()).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn empty_registry_is_dependency_unavailable() {
        let registry = ProviderRegistry::from_providers(vec![]);
        let router = LlmRouter::new(registry, retry_cfg(), &timeouts_cfg(), None, None);
        let result = router.complete_json(json_request()).await;
        assert!(matches!(result, Err(Error::DependencyUnavailable { .. })));
    }

    #[tokio::test]
    async fn preferred_provider_is_tried_first() {
        let first = Arc::new(FlakyProvider {
            id: "first".to_string(),
            fails_remaining: AtomicUsize::new(0),
        }) as Arc<dyn LlmProvider>;
        let second = Arc::new(AlwaysFailsProvider { id: "second".to_string() }) as Arc<dyn LlmProvider>;
        let registry = ProviderRegistry::from_providers(vec![second, first]);
        let router = LlmRouter::new(registry, retry_cfg(), &timeouts_cfg(), Some("first".to_string()), None);

        let result = router.complete_json(json_request()).await.unwrap();
        assert_eq!(result["ok"], true);
    }
}
