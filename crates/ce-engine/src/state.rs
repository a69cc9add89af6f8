//! Shared application state handed to every `axum` handler.
//!
//! The donor's `AppState` bundles a dozen subsystems behind one `Clone`
//! struct passed through `Router::with_state`; this engine needs exactly
//! one: the orchestrator, which already owns every other subsystem
//! (vector index, ontology, LLM router, preferences, context cache,
//! registry, publisher) internally.

use std::sync::Arc;

use ce_domain::config::EngineConfig;
use ce_orchestrator::ExtractionOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub orchestrator: Arc<ExtractionOrchestrator>,
}
