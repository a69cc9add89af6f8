use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One line of a normalized transcript. `line_no` is 1-based and dense.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineRecord {
    pub line_no: u32,
    pub speaker: Option<String>,
    pub text: String,
    pub byte_start: usize,
    pub byte_end: usize,
}

/// Inclusive line range, first <= last.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineSpan {
    pub first: u32,
    pub last: u32,
}

/// A contiguous text window over the transcript, indexed for retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub conversation_id: String,
    pub line_span: LineSpan,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Term extraction / ontology
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single occurrence of a candidate term within the transcript.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Occurrence {
    pub line_no: u32,
    pub char_start: usize,
    pub char_end: usize,
}

/// A deduplicated candidate medical term with every place it occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermCandidate {
    pub surface: String,
    pub normalized: String,
    pub occurrences: Vec<Occurrence>,
}

/// A link between a free-text term and a clinical ontology concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptMapping {
    pub original_term: String,
    pub concept_id: String,
    pub preferred_term: String,
    pub language: String,
    pub confidence: f32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Templates / sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Section type. Known clinical shapes are tagged variants; anything else
/// the caller declares falls back to `Custom` with its own field list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionType {
    Subjective,
    Objective,
    Assessment,
    Plan,
    VisitSummary,
    Referral,
    Custom { fields: Vec<String> },
}

/// An ordered, immutable section description within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSpec {
    pub template_id: String,
    pub section_id: String,
    pub section_type: SectionType,
    pub prompt: String,
    pub order_index: u32,
    pub depends_on: Vec<String>,
}

/// A resolved line reference backing a sentence in generated content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineReference {
    pub line_no: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// Terminal validation outcome for a `SectionResult`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Accepted,
    FailedValidation,
    Error,
}

/// The generated content for one section, plus its grounding evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionResult {
    pub section_id: String,
    pub content: String,
    pub line_references: Vec<LineReference>,
    pub snomed_mappings: Vec<ConceptMapping>,
    pub confidence: f32,
    pub language: String,
    pub validation_status: ValidationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-section state machine: `Pending -> Retrieving -> Generating ->
/// Validating -> {Accepted, Retrying, FailedValidation, Error}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionState {
    Pending,
    Retrieving,
    Generating,
    Validating,
    Retrying,
    Accepted,
    FailedValidation,
    Error,
}

impl SectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SectionState::Accepted | SectionState::FailedValidation | SectionState::Error
        )
    }
}

/// Per-job state machine: `Pending -> Running -> {Completed,
/// PartiallyFailed, Failed, Cancelled}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::PartiallyFailed
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }
}

/// One invocation of the pipeline for one encounter and one template group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub conversation_id: String,
    pub template_group_id: String,
    pub status: JobStatus,
    pub section_states: HashMap<String, SectionState>,
    pub started_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_id: String, conversation_id: String, template_group_id: String) -> Self {
        Self {
            job_id,
            conversation_id,
            template_group_id,
            status: JobStatus::Pending,
            section_states: HashMap::new(),
            started_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Doctor preferences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One preference entry: original term -> preferred wording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceEntry {
    pub preferred: String,
    pub confidence: f32,
    pub last_updated: DateTime<Utc>,
}

/// A doctor's terminology preferences, snapshotted at job start.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DoctorPreferences {
    pub doctor_id: String,
    pub entries: HashMap<String, PreferenceEntry>,
}

impl DoctorPreferences {
    /// Entries with confidence >= `theta_apply`, ready to use in a prompt.
    pub fn applicable(&self, theta_apply: f32) -> HashMap<&str, &str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.confidence >= theta_apply)
            .map(|(k, e)| (k.as_str(), e.preferred.as_str()))
            .collect()
    }
}
