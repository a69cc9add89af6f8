use serde::Serialize;

/// Structured trace events emitted across the engine's crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    IngestCompleted {
        conversation_id: String,
        line_count: usize,
        chunk_count: usize,
    },
    TermsExtracted {
        conversation_id: String,
        candidate_count: usize,
    },
    OntologyResolved {
        conversation_id: String,
        mapped_count: usize,
        unresolved_count: usize,
    },
    SectionStateChanged {
        job_id: String,
        section_id: String,
        state: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        mode: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    CitationRejected {
        job_id: String,
        section_id: String,
        reason: String,
    },
    SectionPublished {
        job_id: String,
        section_id: String,
        validation_status: String,
    },
    JobStatusChanged {
        job_id: String,
        status: String,
    },
    JobCancelled {
        job_id: String,
        sections_in_flight: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ce_event");
    }
}
