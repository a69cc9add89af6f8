//! Per-section execution: retrieval, compositional generation, validation,
//! and the repair-prompt retry loop (§4.9 steps 4-6, §4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ce_domain::config::{RetryConfig, ThresholdsConfig, TimeoutsConfig};
use ce_domain::model::{
    ConceptMapping, LineReference, LineRecord, SectionResult, SectionSpec, SectionState,
    ValidationStatus,
};
use ce_domain::trace::TraceEvent;
use ce_domain::{Error, Result};
use ce_llm::{LlmRouter, TextCompletionRequest};
use ce_ontology::OntologyClient;
use ce_vectorindex::{QueryInput, VectorIndexClient};
use serde::Deserialize;
use tokio::sync::Notify;

use crate::cancel::CancelToken;
use crate::publisher::Publisher;
use crate::registry::JobRegistry;

/// Top-k chunks retrieved per section before generation (§4.9 step 5(i)).
/// Not operator-tunable in SPEC_FULL.md; fixed the way the donor fixes
/// small internal constants rather than threading another config field.
const SECTION_RETRIEVAL_K: usize = 5;

const SYSTEM_PROMPT: &str = "You are a clinical documentation assistant. Given a prompt describing \
a section of a clinical document, transcript excerpts, and optional terminology preferences, write \
the section content. Respond with a JSON object with exactly these fields: \"content\" (the section \
text), \"line_references\" (array of {\"line_no\", \"char_start\", \"char_end\", \"text\"} citing the \
exact transcript substrings backing every clinical statement), \"snomed_mappings\" (array of \
{\"original_term\", \"concept_id\", \"preferred_term\", \"language\", \"confidence\"} for every \
medical concept you ground the section in), and \"confidence\" (your own estimate in [0,1] of how \
well-supported this section is). Never invent a line number that is not present in the transcript.";

#[derive(Debug, Deserialize)]
struct RawSectionOutput {
    content: String,
    line_references: Vec<LineReference>,
    snomed_mappings: Vec<ConceptMapping>,
    confidence: f32,
}

/// State shared read-only across every section task in one job.
pub struct JobShared {
    pub job_id: String,
    pub conversation_id: String,
    pub language: String,
    pub lines: Vec<LineRecord>,
    pub global_mappings: Vec<ConceptMapping>,
    pub applicable_preferences: HashMap<String, String>,
    pub thresholds: ThresholdsConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutsConfig,
    pub vector_index: Arc<dyn VectorIndexClient>,
    pub ontology: Arc<dyn OntologyClient>,
    pub llm: Arc<LlmRouter>,
    pub context_cache: Arc<ce_contextcache::SectionContextCache>,
    pub registry: Arc<JobRegistry>,
    pub publisher: Arc<Publisher>,
    pub notify: Arc<Notify>,
}

fn preferences_clause(preferences: &HashMap<String, String>) -> String {
    if preferences.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = preferences
        .iter()
        .map(|(original, preferred)| format!("- use \"{preferred}\" instead of \"{original}\""))
        .collect();
    format!("\n\nTerminology preferences:\n{}", lines.join("\n"))
}

fn dependency_context_clause(dependencies: &[SectionResult]) -> String {
    if dependencies.is_empty() {
        return String::new();
    }
    let sections: Vec<String> = dependencies
        .iter()
        .map(|d| format!("[{}]\n{}", d.section_id, d.content))
        .collect();
    format!("\n\nAlready-generated dependency sections:\n{}", sections.join("\n\n"))
}

fn retrieved_context_clause(hits: &[ce_vectorindex::ChunkHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let chunks: Vec<String> = hits
        .iter()
        .map(|h| format!("(lines {}-{}) {}", h.chunk.line_span.first, h.chunk.line_span.last, h.chunk.text))
        .collect();
    format!("\n\nRelevant transcript excerpts:\n{}", chunks.join("\n\n"))
}

fn repair_clause(failures: &[ce_validator::ValidationFailure]) -> String {
    let reasons: Vec<String> = failures.iter().map(|f| format!("- {}", f.message)).collect();
    format!(
        "\n\nYour previous attempt was rejected for these reasons; fix them and respond again \
with the full JSON object:\n{}",
        reasons.join("\n")
    )
}

fn build_prompt(
    spec: &SectionSpec,
    hits: &[ce_vectorindex::ChunkHit],
    preferences: &HashMap<String, String>,
    dependencies: &[SectionResult],
    repair: Option<&[ce_validator::ValidationFailure]>,
) -> String {
    let mut prompt = spec.prompt.clone();
    prompt.push_str(&retrieved_context_clause(hits));
    prompt.push_str(&preferences_clause(preferences));
    prompt.push_str(&dependency_context_clause(dependencies));
    if let Some(failures) = repair {
        prompt.push_str(&repair_clause(failures));
    }
    prompt
}

async fn generate_once(shared: &JobShared, prompt: String) -> Result<RawSectionOutput> {
    let response = shared
        .llm
        .complete_text(TextCompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt,
            temperature: 0.3,
            max_tokens: 4_096,
        })
        .await?;

    serde_json::from_str(&response.content)
        .map_err(|e| Error::LlmInvalidOutput(format!("section output did not match schema: {e}")))
}

fn set_state(shared: &JobShared, section_id: &str, state: SectionState) {
    shared.registry.set_section_state(&shared.job_id, section_id, state);
}

/// Mark a section `Error` with `reason` and publish the failure, without
/// ever attempting generation — used when a dependency failed or the
/// section timed out.
async fn fail_without_generation(shared: &JobShared, spec: &SectionSpec, reason: String) {
    set_state(shared, &spec.section_id, SectionState::Error);
    let result = SectionResult {
        section_id: spec.section_id.clone(),
        content: String::new(),
        line_references: vec![],
        snomed_mappings: vec![],
        confidence: 0.0,
        language: shared.language.clone(),
        validation_status: ValidationStatus::Error,
        error: Some(reason),
    };
    let _ = shared.publisher.publish(&shared.job_id, result).await;
    shared.registry.finalize_if_all_sections_terminal(&shared.job_id);
    shared.notify.notify_waiters();
}

/// Wait until every dependency of `spec` is either `Accepted` (returning
/// its cached results) or has failed (returning `Err` so the caller marks
/// this section `Error` with `dependency_failed`, §7 recovery policy).
async fn await_dependencies(
    shared: &JobShared,
    spec: &SectionSpec,
    cancel: &CancelToken,
) -> std::result::Result<Vec<SectionResult>, String> {
    loop {
        if cancel.is_cancelled() {
            return Err("job cancelled".to_string());
        }
        if let Some(results) = shared.context_cache.get_dependencies(&shared.job_id, &spec.depends_on) {
            return Ok(results);
        }

        if let Some(job) = shared.registry.get(&shared.job_id) {
            for dep in &spec.depends_on {
                if let Some(state) = job.section_states.get(dep) {
                    if state.is_terminal() && !matches!(state, SectionState::Accepted) {
                        return Err(format!("dependency_failed: '{dep}' did not reach Accepted"));
                    }
                }
            }
        }

        shared.notify.notified().await;
    }
}

/// Run one section end-to-end: retrieval, generation, validation, retry
/// with repair prompts up to `r_max`, then publication (§4.9 steps 5-6).
pub async fn run_section(shared: Arc<JobShared>, spec: SectionSpec, cancel: CancelToken) {
    match await_dependencies(&shared, &spec, &cancel).await {
        Ok(dependencies) => run_section_inner(&shared, &spec, dependencies, &cancel).await,
        Err(reason) => fail_without_generation(&shared, &spec, reason).await,
    }
}

async fn run_section_inner(
    shared: &JobShared,
    spec: &SectionSpec,
    dependencies: Vec<SectionResult>,
    cancel: &CancelToken,
) {
    let section_timeout = Duration::from_secs(shared.timeouts.section_timeout_sec);
    let outcome = tokio::time::timeout(section_timeout, generate_and_validate(shared, spec, dependencies, cancel)).await;

    match outcome {
        Ok(Some(result)) => {
            let status = result.validation_status;
            if matches!(status, ValidationStatus::Accepted) {
                shared.context_cache.insert(&shared.job_id, result.clone());
            }
            set_state(
                shared,
                &spec.section_id,
                match status {
                    ValidationStatus::Accepted => SectionState::Accepted,
                    ValidationStatus::FailedValidation => SectionState::FailedValidation,
                    ValidationStatus::Error => SectionState::Error,
                },
            );
            if let Err(e) = shared.publisher.publish(&shared.job_id, result).await {
                tracing::warn!(job_id = %shared.job_id, section_id = %spec.section_id, error = %e, "delivery failed");
            }
        }
        Ok(None) => {
            // Cancelled cooperatively mid-generation.
            set_state(shared, &spec.section_id, SectionState::Error);
            let result = SectionResult {
                section_id: spec.section_id.clone(),
                content: String::new(),
                line_references: vec![],
                snomed_mappings: vec![],
                confidence: 0.0,
                language: shared.language.clone(),
                validation_status: ValidationStatus::Error,
                error: Some("cancelled".to_string()),
            };
            let _ = shared.publisher.publish(&shared.job_id, result).await;
        }
        Err(_) => {
            // Section wall-clock timeout: moves to Error without retry (§5).
            fail_without_generation(
                shared,
                spec,
                format!("section exceeded timeout of {:?}", section_timeout),
            )
            .await;
            return;
        }
    }

    shared.registry.finalize_if_all_sections_terminal(&shared.job_id);
    shared.notify.notify_waiters();
}

/// Returns `None` if cancellation was observed mid-loop (caller publishes a
/// cancellation failure), otherwise `Some(result)` with a terminal
/// `validation_status`.
async fn generate_and_validate(
    shared: &JobShared,
    spec: &SectionSpec,
    dependencies: Vec<SectionResult>,
    cancel: &CancelToken,
) -> Option<SectionResult> {
    set_state(shared, &spec.section_id, SectionState::Retrieving);
    let query = format!("{} {:?}", spec.prompt, spec.section_type);
    let hits = shared
        .vector_index
        .query(&shared.conversation_id, QueryInput::Text(query), SECTION_RETRIEVAL_K)
        .await
        .unwrap_or_default();

    let mut repair: Option<Vec<ce_validator::ValidationFailure>> = None;

    for attempt in 0..shared.retry.r_max.max(1) {
        if cancel.is_cancelled() {
            return None;
        }

        set_state(shared, &spec.section_id, SectionState::Generating);
        let prompt = build_prompt(spec, &hits, &shared.applicable_preferences, &dependencies, repair.as_deref());

        let raw = match generate_once(shared, prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(job_id = %shared.job_id, section_id = %spec.section_id, attempt, error = %e, "generation failed");
                if attempt + 1 >= shared.retry.r_max {
                    // LLMInvalidOutput exhausts into FailedValidation (§7);
                    // everything else (DependencyUnavailable, Timeout) is a
                    // hard Error with no further retry.
                    return Some(if matches!(e, Error::LlmInvalidOutput(_)) {
                        let mut failed = terminal_failure(shared, spec, format!("generation failed: {e}"));
                        failed.validation_status = ValidationStatus::FailedValidation;
                        failed
                    } else {
                        terminal_failure(shared, spec, format!("generation failed: {e}"))
                    });
                }
                continue;
            }
        };

        let candidate = SectionResult {
            section_id: spec.section_id.clone(),
            content: raw.content,
            line_references: raw.line_references,
            snomed_mappings: raw.snomed_mappings,
            confidence: raw.confidence,
            language: shared.language.clone(),
            validation_status: ValidationStatus::Accepted,
            error: None,
        };

        set_state(shared, &spec.section_id, SectionState::Validating);
        let (citation_failures, citation_pass_ratio) = ce_validator::validate_citations(&candidate, &shared.lines);
        let grounding_failures = ce_validator::validate_grounding(
            &candidate,
            &shared.global_mappings,
            shared.ontology.as_ref(),
            &shared.language,
            shared.thresholds.n_max,
        )
        .await;
        let schema_failures = ce_validator::validate_schema(&candidate, &spec.section_type);

        let blended = ce_validator::blended_confidence(candidate.confidence, citation_pass_ratio);
        let mut candidate = candidate;
        candidate.confidence = blended;
        let confidence_failures = ce_validator::validate_confidence(&candidate, shared.thresholds.theta_accept);

        let mut failures = citation_failures;
        failures.extend(grounding_failures);
        failures.extend(schema_failures);
        failures.extend(confidence_failures);

        if failures.is_empty() {
            return Some(candidate);
        }

        for failure in &failures {
            TraceEvent::CitationRejected {
                job_id: shared.job_id.clone(),
                section_id: spec.section_id.clone(),
                reason: failure.message.clone(),
            }
            .emit();
        }

        if attempt + 1 >= shared.retry.r_max {
            let mut failed = candidate;
            failed.validation_status = ValidationStatus::FailedValidation;
            failed.error = Some(
                failures
                    .iter()
                    .map(|f| f.message.clone())
                    .collect::<Vec<_>>()
                    .join("; "),
            );
            return Some(failed);
        }

        set_state(shared, &spec.section_id, SectionState::Retrying);
        repair = Some(failures);
    }

    Some(terminal_failure(shared, spec, "exhausted retries".to_string()))
}

fn terminal_failure(shared: &JobShared, spec: &SectionSpec, reason: String) -> SectionResult {
    SectionResult {
        section_id: spec.section_id.clone(),
        content: String::new(),
        line_references: vec![],
        snomed_mappings: vec![],
        confidence: 0.0,
        language: shared.language.clone(),
        validation_status: ValidationStatus::Error,
        error: Some(reason),
    }
}
