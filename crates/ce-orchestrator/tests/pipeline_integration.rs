//! End-to-end pipeline exercise: `ProcessEncounter` through ingest, global
//! term resolution, dependency-ordered section generation, and publication,
//! against in-memory collaborators (§8 "Test tooling" — async invariants are
//! exercised with `#[tokio::test]` against an in-memory triple, mirroring
//! the donor's `crates/providers/tests/router_integration.rs`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ce_domain::config::{EngineConfig, RetryConfig, TimeoutsConfig};
use ce_domain::model::JobStatus;
use ce_domain::Result;
use ce_llm::{
    JsonCompletionRequest, LlmProvider, LlmRouter, ProviderRegistry, TextCompletionRequest,
    TextCompletionResponse,
};
use ce_ontology::LexiconOntologyClient;
use ce_orchestrator::cancel::CancelMap;
use ce_orchestrator::publisher::{BroadcastOnlySink, Publisher};
use ce_orchestrator::registry::JobRegistry;
use ce_orchestrator::request::{ProcessEncounterRequest, SectionInput, TemplateInput};
use ce_orchestrator::ExtractionOrchestrator;
use ce_preferences::PreferenceStore;
use ce_vectorindex::InMemoryVectorIndex;
use serde_json::json;

/// A fixed-response provider: no terms on the extraction pass, and a
/// marker-keyed canned completion per section prompt on the generation
/// pass, so each section in a multi-section job gets distinguishable
/// content without needing a real model.
struct ScriptedProvider;

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }
    fn model(&self) -> &str {
        "test-model"
    }

    async fn complete_json(&self, _request: JsonCompletionRequest) -> Result<serde_json::Value> {
        Ok(json!([]))
    }

    async fn complete_text(&self, request: TextCompletionRequest) -> Result<TextCompletionResponse> {
        let content = if request.prompt.contains("[SUBJECTIVE]") {
            json!({
                "content": "Patient reports feeling generally well today.",
                "line_references": [
                    {"line_no": 1, "char_start": 12, "char_end": 19, "text": "feeling"}
                ],
                "snomed_mappings": [],
                "confidence": 0.95
            })
        } else {
            json!({
                "content": "Plan acknowledges the prior subjective note and continues the current regimen.",
                "line_references": [],
                "snomed_mappings": [],
                "confidence": 0.9
            })
        };
        Ok(TextCompletionResponse {
            content: content.to_string(),
            usage: ce_llm::CompletionUsage {
                prompt_tokens: None,
                completion_tokens: None,
            },
        })
    }
}

fn test_config() -> Arc<EngineConfig> {
    let mut config = EngineConfig::default();
    config.retry = RetryConfig {
        r_max: 1,
        backoff_base_ms: 1,
        backoff_cap_ms: 1,
    };
    config.timeouts = TimeoutsConfig {
        section_timeout_sec: 5,
        job_timeout_sec: 30,
        llm_timeout_sec: 5,
    };
    Arc::new(config)
}

fn build_orchestrator() -> (Arc<ExtractionOrchestrator>, tempfile::TempDir) {
    let config = test_config();
    let vector_index = Arc::new(InMemoryVectorIndex::new());
    let ontology = Arc::new(LexiconOntologyClient::new());
    let provider = Arc::new(ScriptedProvider) as Arc<dyn LlmProvider>;
    let registry = ProviderRegistry::from_providers(vec![provider]);
    let llm = Arc::new(LlmRouter::new(registry, config.retry.clone(), &config.timeouts, None, None));

    let dir = tempfile::tempdir().unwrap();
    let preferences = Arc::new(PreferenceStore::load(dir.path().join("preferences.json")).unwrap());
    let context_cache = Arc::new(ce_contextcache::SectionContextCache::new());
    let job_registry = Arc::new(JobRegistry::new());
    let cancel_map = Arc::new(CancelMap::new());
    let publisher = Arc::new(Publisher::new(Box::new(BroadcastOnlySink)));

    let orchestrator = Arc::new(ExtractionOrchestrator::new(
        config,
        vector_index,
        ontology,
        llm,
        preferences,
        context_cache,
        job_registry,
        cancel_map,
        publisher,
    ));
    (orchestrator, dir)
}

fn request() -> ProcessEncounterRequest {
    ProcessEncounterRequest {
        conversation_id: "conv-1".to_string(),
        templates: vec![TemplateInput {
            template_id: "soap".to_string(),
            sections: vec![
                SectionInput {
                    section_id: "subjective".to_string(),
                    section_type: ce_domain::model::SectionType::Subjective,
                    prompt: "Summarize the subjective complaints. [SUBJECTIVE]".to_string(),
                    depends_on: vec![],
                },
                SectionInput {
                    section_id: "plan".to_string(),
                    section_type: ce_domain::model::SectionType::Plan,
                    prompt: "Summarize the plan. [PLAN]".to_string(),
                    depends_on: vec!["subjective".to_string()],
                },
            ],
        }],
        transcription_text: "Doctor: how are you feeling today\nPatient: I am doing well overall".to_string(),
        doctor_id: "dr-1".to_string(),
        doctor_preferences: None,
        language: Some("en".to_string()),
    }
}

async fn wait_for_terminal(orchestrator: &ExtractionOrchestrator, job_id: &str) -> JobStatus {
    for _ in 0..200 {
        if let Some(job) = orchestrator.job_status(job_id) {
            if job.status.is_terminal() {
                return job.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

#[tokio::test]
async fn process_encounter_completes_with_dependency_ordered_sections() {
    let (orchestrator, _dir) = build_orchestrator();
    let job = orchestrator.process_encounter(request()).await.unwrap();

    let status = wait_for_terminal(&orchestrator, &job.job_id).await;
    assert_eq!(status, JobStatus::Completed);

    let final_job = orchestrator.job_status(&job.job_id).unwrap();
    assert_eq!(
        final_job.section_states["subjective"],
        ce_domain::model::SectionState::Accepted
    );
    assert_eq!(final_job.section_states["plan"], ce_domain::model::SectionState::Accepted);
}

#[tokio::test]
async fn each_section_is_published_exactly_once() {
    let (orchestrator, _dir) = build_orchestrator();
    let job = orchestrator.process_encounter(request()).await.unwrap();
    let mut rx = orchestrator.publisher.subscribe(&job.job_id);
    wait_for_terminal(&orchestrator, &job.job_id).await;

    let mut seen = HashMap::new();
    while let Ok(result) = rx.try_recv() {
        *seen.entry(result.section_id.clone()).or_insert(0) += 1;
    }
    for (_section_id, count) in seen {
        assert_eq!(count, 1);
    }
}

#[tokio::test]
async fn validate_templates_rejects_unknown_dependency() {
    let (orchestrator, _dir) = build_orchestrator();
    let templates = vec![TemplateInput {
        template_id: "soap".to_string(),
        sections: vec![SectionInput {
            section_id: "a".to_string(),
            section_type: ce_domain::model::SectionType::Subjective,
            prompt: "p".to_string(),
            depends_on: vec!["ghost".to_string()],
        }],
    }];
    assert!(orchestrator.validate_templates(&templates).is_err());
}

#[tokio::test]
async fn cancel_job_is_idempotent_and_marks_job_cancelled() {
    let (orchestrator, _dir) = build_orchestrator();
    let job = orchestrator.process_encounter(request()).await.unwrap();

    assert!(orchestrator.cancel_job(&job.job_id));
    assert!(orchestrator.cancel_job(&job.job_id));

    let final_job = orchestrator.job_status(&job.job_id).unwrap();
    assert_eq!(final_job.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn cancel_of_unknown_job_returns_false() {
    let (orchestrator, _dir) = build_orchestrator();
    assert!(!orchestrator.cancel_job("does-not-exist"));
}

#[tokio::test]
async fn doctor_preferences_round_trip_through_the_orchestrator() {
    let (orchestrator, _dir) = build_orchestrator();
    orchestrator
        .put_doctor_preferences("dr-1", HashMap::from([("Hypertension".to_string(), "HTN".to_string())]))
        .unwrap();
    let prefs = orchestrator.get_doctor_preferences("dr-1");
    assert_eq!(prefs.get("Hypertension"), Some(&"HTN".to_string()));
}

#[tokio::test]
async fn health_reports_ok_with_a_registered_provider() {
    let (orchestrator, _dir) = build_orchestrator();
    assert!(orchestrator.health().await);
}
