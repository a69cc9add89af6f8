//! Extraction Orchestrator (§4.9) — ties ingest, global term resolution,
//! template resolution, per-section scheduling, and publication together
//! into one `process_encounter` entry point, plus the `CancelJob` /
//! `JobStatus` / `ValidateTemplates` / `Health` surface (§6, §4.11).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ce_domain::config::EngineConfig;
use ce_domain::model::{Job, JobStatus, SectionSpec};
use ce_domain::trace::TraceEvent;
use ce_domain::{Error, Result};
use ce_llm::LlmRouter;
use ce_ontology::OntologyClient;
use ce_preferences::PreferenceStore;
use ce_vectorindex::{QueryInput, VectorIndexClient};
use parking_lot::RwLock;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::cancel::CancelMap;
use crate::execution::{run_section, JobShared};
use crate::publisher::Publisher;
use crate::registry::JobRegistry;
use crate::request::ProcessEncounterRequest;
use crate::templates;

pub struct ExtractionOrchestrator {
    config: Arc<EngineConfig>,
    vector_index: Arc<dyn VectorIndexClient>,
    ontology: Arc<dyn OntologyClient>,
    llm: Arc<LlmRouter>,
    preferences: Arc<PreferenceStore>,
    context_cache: Arc<ce_contextcache::SectionContextCache>,
    pub registry: Arc<JobRegistry>,
    cancel_map: Arc<CancelMap>,
    pub publisher: Arc<Publisher>,
    global_semaphore: Arc<Semaphore>,
    job_notify: RwLock<HashMap<String, Arc<Notify>>>,
}

impl ExtractionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        vector_index: Arc<dyn VectorIndexClient>,
        ontology: Arc<dyn OntologyClient>,
        llm: Arc<LlmRouter>,
        preferences: Arc<PreferenceStore>,
        context_cache: Arc<ce_contextcache::SectionContextCache>,
        registry: Arc<JobRegistry>,
        cancel_map: Arc<CancelMap>,
        publisher: Arc<Publisher>,
    ) -> Self {
        let global_semaphore = Arc::new(Semaphore::new(config.concurrency.c_global));
        Self {
            config,
            vector_index,
            ontology,
            llm,
            preferences,
            context_cache,
            registry,
            cancel_map,
            publisher,
            global_semaphore,
            job_notify: RwLock::new(HashMap::new()),
        }
    }

    fn notify_for(&self, job_id: &str) -> Arc<Notify> {
        self.job_notify
            .write()
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// `ValidateTemplates` (§6): structural validation only, no job created.
    pub fn validate_templates(&self, templates: &[crate::request::TemplateInput]) -> Result<Vec<SectionSpec>> {
        templates::resolve_and_validate(templates)
    }

    /// `GetDoctorPreferences` / `PutDoctorPreferences` (§6) passthroughs.
    pub fn get_doctor_preferences(&self, doctor_id: &str) -> HashMap<String, String> {
        self.preferences.get(doctor_id)
    }

    pub fn put_doctor_preferences(&self, doctor_id: &str, updates: HashMap<String, String>) -> Result<()> {
        self.preferences.put(doctor_id, updates)
    }

    /// `JobStatus` (§6, §4.11).
    pub fn job_status(&self, job_id: &str) -> Option<Job> {
        self.registry.get(job_id)
    }

    /// `CancelJob` (§6, §4.11, §5): idempotent, best-effort. Cancelling a
    /// non-existent or already-terminal job is a no-op that still returns
    /// `true` if the job exists (§8 invariant 6: repeated calls are
    /// indistinguishable from one).
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let job = match self.registry.get(job_id) {
            Some(j) => j,
            None => return false,
        };
        if job.status.is_terminal() {
            return true;
        }

        let in_flight = job.section_states.values().filter(|s| !s.is_terminal()).count();
        self.cancel_map.cancel(job_id);
        self.registry.set_status(job_id, JobStatus::Cancelled);
        TraceEvent::JobCancelled {
            job_id: job_id.to_string(),
            sections_in_flight: in_flight,
        }
        .emit();
        self.notify_for(job_id).notify_waiters();
        true
    }

    /// Periodic maintenance sweep (§4.13): drop terminal jobs older than
    /// `cutoff` from the registry, evict the same jobs from the context
    /// cache and publisher so neither grows unbounded (§1: the context
    /// cache is in-flight-only, not a persistent store), and clear their
    /// cancellation tokens and group entries so the cancel map doesn't
    /// accumulate one stale entry per job for the lifetime of the engine.
    pub fn prune_terminal_before(&self, cutoff: chrono::DateTime<chrono::Utc>) {
        for job_id in self.registry.prune_terminal_before(cutoff) {
            self.context_cache.evict_job(&job_id);
            self.publisher.evict_job(&job_id);
            self.cancel_map.remove(&job_id);
        }
    }

    /// `Health` (§6): ok iff the vector index, ontology, and LLM clients
    /// each respond within a short probe.
    pub async fn health(&self) -> bool {
        let probe = async {
            self.vector_index
                .query("__health_probe__", QueryInput::Text(String::new()), 1)
                .await
                .is_ok()
                && self.ontology.resolve(&[], "en", 1).await.is_ok()
                && !self.llm.registry().is_empty()
        };
        tokio::time::timeout(Duration::from_secs(5), probe).await.unwrap_or(false)
    }

    /// `ProcessEncounter` (§6, §4.9). Ingest and template resolution run
    /// synchronously and fail fast (§7); everything from global term
    /// resolution onward runs in a spawned background task so the caller
    /// gets `job_id` back immediately.
    pub async fn process_encounter(self: &Arc<Self>, request: ProcessEncounterRequest) -> Result<Job> {
        let specs = templates::resolve_and_validate(&request.templates)?;

        let (lines, detected_language) = ce_normalize::normalize(
            &request.transcription_text,
            request.language.as_deref(),
            self.config.normalizer.max_bytes,
        )?;

        let template_group_id = request.template_group_id();
        if let Some(existing) = self.registry.running_job_for(&request.conversation_id, &template_group_id) {
            if !existing.status.is_terminal() {
                self.cancel_job(&existing.job_id);
            }
        }

        let job_id = Uuid::new_v4().to_string();
        let mut job = Job::new(job_id.clone(), request.conversation_id.clone(), template_group_id);
        for spec in &specs {
            job.section_states.insert(spec.section_id.clone(), ce_domain::model::SectionState::Pending);
        }
        self.registry.insert(job.clone());
        self.registry.set_status(&job_id, JobStatus::Running);

        let orchestrator = self.clone();
        let language = detected_language;
        tokio::spawn(async move {
            orchestrator.run_job(job_id, request, specs, lines, language).await;
        });

        Ok(job)
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: String,
        request: ProcessEncounterRequest,
        specs: Vec<SectionSpec>,
        lines: Vec<ce_domain::model::LineRecord>,
        language: String,
    ) {
        let cancel_token = self.cancel_map.register(&job_id);
        let notify = self.notify_for(&job_id);

        let job_timeout = Duration::from_secs(self.config.timeouts.job_timeout_sec);
        let orchestrator = self.clone();
        let watchdog_job_id = job_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(job_timeout).await;
            if let Some(job) = orchestrator.registry.get(&watchdog_job_id) {
                if !job.status.is_terminal() {
                    orchestrator.cancel_job(&watchdog_job_id);
                }
            }
        });

        if cancel_token.is_cancelled() {
            return;
        }

        // Step 1: ingest — chunk and vector-upsert.
        let chunks = ce_chunker::chunk(&request.conversation_id, &lines, &self.config.chunker);
        let chunk_count = chunks.len();
        if let Err(e) = self.vector_index.upsert(&request.conversation_id, chunks).await {
            tracing::error!(job_id, error = %e, "ingest upsert failed");
            self.registry.set_status(&job_id, JobStatus::Failed);
            return;
        }
        TraceEvent::IngestCompleted {
            conversation_id: request.conversation_id.clone(),
            line_count: lines.len(),
            chunk_count,
        }
        .emit();

        if cancel_token.is_cancelled() {
            self.registry.set_status(&job_id, JobStatus::Cancelled);
            return;
        }

        // Step 2: global term resolution.
        let terms = match ce_termextract::extract(
            &lines,
            &self.llm,
            &self.config.chunker,
            ce_termextract::DEFAULT_MAX_CONTEXT_CHARS,
        )
        .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(job_id, error = %e, "term extraction failed");
                self.registry.set_status(&job_id, JobStatus::Failed);
                return;
            }
        };
        TraceEvent::TermsExtracted {
            conversation_id: request.conversation_id.clone(),
            candidate_count: terms.len(),
        }
        .emit();

        let global_mappings = self
            .ontology
            .resolve(&terms, &language, self.config.thresholds.n_max)
            .await
            .unwrap_or_default();
        TraceEvent::OntologyResolved {
            conversation_id: request.conversation_id.clone(),
            mapped_count: global_mappings.len(),
            unresolved_count: terms.len().saturating_sub(global_mappings.len()),
        }
        .emit();

        // Preferences: snapshot at job start, request overlay takes
        // precedence (§9 open question resolution), filtered by theta_apply.
        let snapshot = self.preferences.snapshot(&request.doctor_id);
        let merged = ce_preferences::PreferenceStore::overlay(&snapshot, request.doctor_preferences.as_ref());
        let applicable: HashMap<String, String> = merged
            .applicable(self.config.thresholds.theta_apply)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let shared = Arc::new(JobShared {
            job_id: job_id.clone(),
            conversation_id: request.conversation_id.clone(),
            language,
            lines,
            global_mappings,
            applicable_preferences: applicable,
            thresholds: self.config.thresholds.clone(),
            retry: self.config.retry.clone(),
            timeouts: self.config.timeouts.clone(),
            vector_index: self.vector_index.clone(),
            ontology: self.ontology.clone(),
            llm: self.llm.clone(),
            context_cache: self.context_cache.clone(),
            registry: self.registry.clone(),
            publisher: self.publisher.clone(),
            notify,
        });

        let job_semaphore = Arc::new(Semaphore::new(self.config.concurrency.c_job));

        for spec in specs {
            let section_key = format!("{job_id}:{}", spec.section_id);
            let section_cancel = self.cancel_map.register(&section_key);
            self.cancel_map.add_to_group(&job_id, &section_key);

            let shared = shared.clone();
            let global_semaphore = self.global_semaphore.clone();
            let job_semaphore = job_semaphore.clone();
            let cancel_map = self.cancel_map.clone();

            tokio::spawn(async move {
                let _global_permit = global_semaphore.acquire().await;
                let _job_permit = job_semaphore.acquire().await;
                run_section(shared, spec, section_cancel).await;
                cancel_map.remove(&section_key);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::BroadcastOnlySink;
    use ce_llm::{LlmProvider, ProviderRegistry, TextCompletionRequest, TextCompletionResponse};
    use ce_ontology::LexiconOntologyClient;
    use ce_vectorindex::InMemoryVectorIndex;

    struct EmptyProvider;

    #[async_trait::async_trait]
    impl LlmProvider for EmptyProvider {
        fn provider_id(&self) -> &str {
            "empty"
        }
        fn model(&self) -> &str {
            "test"
        }
        async fn complete_json(&self, _request: ce_llm::JsonCompletionRequest) -> Result<serde_json::Value> {
            Ok(serde_json::json!([]))
        }
        async fn complete_text(&self, _request: TextCompletionRequest) -> Result<TextCompletionResponse> {
            unimplemented!()
        }
    }

    fn orchestrator() -> (Arc<ExtractionOrchestrator>, tempfile::TempDir) {
        let config = Arc::new(EngineConfig::default());
        let vector_index = Arc::new(InMemoryVectorIndex::new());
        let ontology = Arc::new(LexiconOntologyClient::new());
        let provider = Arc::new(EmptyProvider) as Arc<dyn LlmProvider>;
        let registry = ProviderRegistry::from_providers(vec![provider]);
        let llm = Arc::new(LlmRouter::new(registry, config.retry.clone(), &config.timeouts, None, None));
        let dir = tempfile::tempdir().unwrap();
        let preferences = Arc::new(PreferenceStore::load(dir.path().join("preferences.json")).unwrap());
        let context_cache = Arc::new(ce_contextcache::SectionContextCache::new());
        let job_registry = Arc::new(JobRegistry::new());
        let cancel_map = Arc::new(CancelMap::new());
        let publisher = Arc::new(Publisher::new(Box::new(BroadcastOnlySink)));
        (
            Arc::new(ExtractionOrchestrator::new(
                config,
                vector_index,
                ontology,
                llm,
                preferences,
                context_cache,
                job_registry,
                cancel_map,
                publisher,
            )),
            dir,
        )
    }

    #[test]
    fn pruning_a_terminal_job_clears_its_cancellation_token() {
        let (orchestrator, _dir) = orchestrator();
        let job_id = "job-1".to_string();
        orchestrator
            .registry
            .insert(Job::new(job_id.clone(), "conv-1".to_string(), "group-1".to_string()));
        orchestrator.registry.set_status(&job_id, JobStatus::Completed);
        orchestrator.cancel_map.register(&job_id);
        assert!(orchestrator.cancel_map.is_running(&job_id));

        orchestrator.prune_terminal_before(chrono::Utc::now() + chrono::Duration::seconds(1));

        assert!(orchestrator.registry.get(&job_id).is_none());
        assert!(!orchestrator.cancel_map.is_running(&job_id));
    }
}
