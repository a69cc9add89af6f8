//! Citation Validator + Validator Service — grounding, structural, and
//! confidence checks a candidate [`SectionResult`] must pass before
//! publication (§4.8).
//!
//! The accumulator shape (collect every failure rather than short-circuit
//! on the first) follows `ce-domain`'s `EngineConfig::validate` /
//! `ConfigError` idiom, generalized from config fields to section content.

use std::collections::HashSet;

use ce_domain::model::{ConceptMapping, LineRecord, SectionResult, SectionType};
use ce_ontology::OntologyClient;
use unicode_normalization::UnicodeNormalization;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Failures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// §4.8 (1)-(3): a line reference fails to resolve against the stored
    /// transcript.
    BadLineReference,
    /// §4.8 (b): a medical entity in `content` has no backing concept
    /// mapping, job-global or section-local.
    UngroundedEntity,
    /// §4.8 (c): the section-type schema did not validate.
    SchemaInvalid,
    /// §4.8 (d): confidence below `theta_accept`.
    LowConfidence,
}

#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub kind: FailureKind,
    pub message: String,
}

fn failure(kind: FailureKind, message: impl Into<String>) -> ValidationFailure {
    ValidationFailure {
        kind,
        message: message.into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Citation validation (§4.8 points 1-3)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn char_slice(text: &str, start: usize, end: usize) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    if start >= end || end > chars.len() {
        return None;
    }
    Some(chars[start..end].iter().collect())
}

/// Validate every line reference on `section` against the stored
/// transcript. Returns one failure per bad reference, plus the fraction
/// that passed (for the confidence blend in §9).
pub fn validate_citations(section: &SectionResult, lines: &[LineRecord]) -> (Vec<ValidationFailure>, f32) {
    if section.line_references.is_empty() {
        return (Vec::new(), 1.0);
    }

    let mut failures = Vec::new();
    let mut passed = 0usize;

    for reference in &section.line_references {
        let Some(line) = lines.iter().find(|l| l.line_no == reference.line_no) else {
            failures.push(failure(
                FailureKind::BadLineReference,
                format!("line {} does not exist in the stored transcript", reference.line_no),
            ));
            continue;
        };

        let Some(actual) = char_slice(&line.text, reference.char_start, reference.char_end) else {
            failures.push(failure(
                FailureKind::BadLineReference,
                format!(
                    "line {} span [{},{}) is out of bounds",
                    reference.line_no, reference.char_start, reference.char_end
                ),
            ));
            continue;
        };

        // NFC normalization before equality, per §8 invariant 1.
        let actual_nfc: String = actual.nfc().collect();
        let expected_nfc: String = reference.text.nfc().collect();
        if actual_nfc != expected_nfc {
            failures.push(failure(
                FailureKind::BadLineReference,
                format!(
                    "line {} span [{},{}) text mismatch: expected '{}', stored '{}'",
                    reference.line_no, reference.char_start, reference.char_end, reference.text, actual
                ),
            ));
            continue;
        }

        passed += 1;
    }

    let ratio = passed as f32 / section.line_references.len() as f32;
    (failures, ratio)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Grounding validation (§4.8 point b)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lightweight 1- and 2-word lowercase candidate surfaces from free text,
/// used to scan generated content for entity mentions without a second LLM
/// round trip per §4.4's extractor pattern — same idea (scan, then resolve
/// against the ontology), cheaper mechanism.
fn candidate_surfaces(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();

    let mut out = Vec::new();
    for w in &words {
        out.push(w.clone());
    }
    for pair in words.windows(2) {
        out.push(format!("{} {}", pair[0], pair[1]));
    }
    out
}

/// Check that every medical entity mentioned in `content` is backed by a
/// concept mapping, either section-local or job-global. Partial ontology
/// outage degrades rather than fails (§9): unresolved candidate surfaces
/// are not themselves failures, only surfaces that DID resolve to a
/// concept absent from both mapping sets.
pub async fn validate_grounding(
    section: &SectionResult,
    global_mappings: &[ConceptMapping],
    ontology: &dyn OntologyClient,
    language: &str,
    n_max: usize,
) -> Vec<ValidationFailure> {
    let known_ids: HashSet<&str> = section
        .snomed_mappings
        .iter()
        .chain(global_mappings.iter())
        .map(|m| m.concept_id.as_str())
        .collect();

    let candidates = candidate_surfaces(&section.content);
    if candidates.is_empty() {
        return Vec::new();
    }

    let term_candidates: Vec<ce_domain::model::TermCandidate> = candidates
        .into_iter()
        .map(|normalized| ce_domain::model::TermCandidate {
            surface: normalized.clone(),
            normalized,
            occurrences: Vec::new(),
        })
        .collect();

    let resolved = match ontology.resolve(&term_candidates, language, n_max).await {
        Ok(mappings) => mappings,
        Err(e) => {
            tracing::warn!(error = %e, "ontology unavailable during grounding check, skipping");
            return Vec::new();
        }
    };

    let mut failures = Vec::new();
    let mut reported = HashSet::new();
    for mapping in &resolved {
        // High-confidence resolution of a surface actually present in the
        // content, but not among the concept ids this section (or the job)
        // already grounds.
        if mapping.confidence >= 0.9
            && !known_ids.contains(mapping.concept_id.as_str())
            && reported.insert(mapping.concept_id.clone())
        {
            failures.push(failure(
                FailureKind::UngroundedEntity,
                format!(
                    "content mentions '{}' (concept {}) with no backing mapping",
                    mapping.original_term, mapping.concept_id
                ),
            ));
        }
    }
    failures
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema + confidence (§4.8 points c, d)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn validate_schema(section: &SectionResult, section_type: &SectionType) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();

    if section.content.trim().is_empty() {
        failures.push(failure(FailureKind::SchemaInvalid, "section content is empty"));
    }
    if !(0.0..=1.0).contains(&section.confidence) {
        failures.push(failure(
            FailureKind::SchemaInvalid,
            format!("confidence {} is out of range [0,1]", section.confidence),
        ));
    }

    if let SectionType::Custom { fields } = section_type {
        if fields.is_empty() {
            failures.push(failure(
                FailureKind::SchemaInvalid,
                "custom section type declares no fields",
            ));
        }
    }

    failures
}

pub fn validate_confidence(section: &SectionResult, theta_accept: f32) -> Vec<ValidationFailure> {
    if section.confidence < theta_accept {
        vec![failure(
            FailureKind::LowConfidence,
            format!("confidence {} is below theta_accept {theta_accept}", section.confidence),
        )]
    } else {
        Vec::new()
    }
}

/// Blend the LLM's self-reported confidence with the citation pass ratio
/// (§9 open question resolution): `min(llm_self_score, citation_pass_ratio)`.
pub fn blended_confidence(llm_self_score: f32, citation_pass_ratio: f32) -> f32 {
    llm_self_score.min(citation_pass_ratio)
}

/// Run every §4.8 check and return the combined failure list. An empty
/// result means the section is accepted.
pub async fn validate_section(
    section: &SectionResult,
    section_type: &SectionType,
    lines: &[LineRecord],
    global_mappings: &[ConceptMapping],
    ontology: &dyn OntologyClient,
    language: &str,
    n_max: usize,
    theta_accept: f32,
) -> Vec<ValidationFailure> {
    let (mut failures, _ratio) = validate_citations(section, lines);
    failures.extend(validate_grounding(section, global_mappings, ontology, language, n_max).await);
    failures.extend(validate_schema(section, section_type));
    failures.extend(validate_confidence(section, theta_accept));
    failures
}
