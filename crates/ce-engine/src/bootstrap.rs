//! `AppState` construction, extracted from `main.rs` so the `serve`
//! subcommand and tests can share it (§4.13) — the same split the donor
//! gateway's `bootstrap::build_app_state` makes.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use ce_domain::config::{ConfigSeverity, EngineConfig};
use ce_llm::{LlmRouter, ProviderRegistry};
use ce_ontology::LexiconOntologyClient;
use ce_orchestrator::{BroadcastOnlySink, CancelMap, ExtractionOrchestrator, JobRegistry, Publisher};
use ce_preferences::PreferenceStore;
use ce_vectorindex::InMemoryVectorIndex;

use crate::state::AppState;

/// Validate config, initialize every subsystem, and wire up the
/// [`ExtractionOrchestrator`] behind [`AppState`].
pub fn build_app_state(config: EngineConfig) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let config = Arc::new(config);

    // ── Vector Index Client (§4.3) ───────────────────────────────────
    let vector_index = Arc::new(InMemoryVectorIndex::new());
    tracing::info!("vector index ready (in-memory)");

    // ── Ontology Client (§4.5) ────────────────────────────────────────
    let ontology = Arc::new(LexiconOntologyClient::new());
    tracing::info!("ontology client ready (built-in lexicon)");

    // ── LLM providers + router (§4.7) ─────────────────────────────────
    let provider_registry =
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?;
    if provider_registry.is_empty() {
        tracing::warn!(
            "no LLM providers initialized — the engine will boot but section \
             generation and term extraction will fail until one is configured"
        );
    } else {
        tracing::info!(providers = provider_registry.len(), "LLM provider registry ready");
    }
    let llm = Arc::new(LlmRouter::new(
        provider_registry,
        config.retry.clone(),
        &config.timeouts,
        config.llm.deterministic_provider.clone(),
        config.llm.compositional_provider.clone(),
    ));

    // ── Preference Store (§4.6 data model half) ───────────────────────
    let state_dir = Path::new(&config.storage.state_dir);
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("creating state dir {}", state_dir.display()))?;
    let preferences = Arc::new(
        PreferenceStore::load(state_dir.join("preferences.json"))
            .context("loading preference store")?,
    );
    tracing::info!(path = %state_dir.display(), "preference store ready");

    // ── Section Context Cache (§4.6) ───────────────────────────────────
    let context_cache = Arc::new(ce_contextcache::SectionContextCache::new());

    // ── Job Registry + cancellation + publisher (§4.9-§4.11) ─────────
    let job_registry = Arc::new(JobRegistry::new());
    let cancel_map = Arc::new(CancelMap::new());
    let publisher = Arc::new(Publisher::new(Box::new(BroadcastOnlySink)));
    tracing::info!("job registry, cancel map, and publisher ready");

    let orchestrator = Arc::new(ExtractionOrchestrator::new(
        config.clone(),
        vector_index,
        ontology,
        llm,
        preferences,
        context_cache,
        job_registry,
        cancel_map,
        publisher,
    ));

    Ok(AppState {
        config,
        orchestrator,
    })
}

/// Spawn the long-running background sweep (terminal job eviction) the way
/// the donor's `bootstrap::spawn_background_tasks` spawns periodic
/// maintenance loops (§4.13).
pub fn spawn_background_tasks(state: &AppState) {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            orchestrator.prune_terminal_before(chrono::Utc::now() - chrono::Duration::hours(1));
        }
    });
    tracing::info!("background job-registry pruning started (5m tick, 1h retention)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.storage.state_dir = String::new();
        let err = build_app_state(config).unwrap_err();
        assert!(err.to_string().contains("error"));
    }

    #[test]
    fn boots_with_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.storage.state_dir = dir.path().to_string_lossy().into_owned();
        let state = build_app_state(config).expect("default config should boot");
        assert!(state.orchestrator.job_status("nonexistent").is_none());
    }
}
