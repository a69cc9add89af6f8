//! Term Extractor — single deterministic pass over the transcript producing
//! a deduplicated set of candidate medical terms (§4.4).
//!
//! When the transcript exceeds the LLM's context, the transcript is
//! windowed with the same stride the [`ce_chunker`] uses, and results are
//! deduplicated by `normalized`, merging occurrences — the same
//! first-pass-wins overlap strategy used to merge extraction passes in
//! `other_examples/.../langextract` 's `merge_non_overlapping_extractions`,
//! adapted here to merge by term identity rather than char-interval overlap.

use std::collections::HashMap;

use ce_chunker::chunk as chunk_lines;
use ce_domain::config::ChunkerConfig;
use ce_domain::model::{LineRecord, Occurrence, TermCandidate};
use ce_domain::{Error, Result};
use ce_llm::{JsonCompletionRequest, LlmRouter};
use serde::Deserialize;

/// Approximate chars-per-token budget below which the full transcript is
/// sent in a single extraction pass. Above it, the transcript is windowed.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You are a clinical term extraction system. Given a numbered, \
speaker-annotated transcript, identify every mention of a medical term (symptom, diagnosis, \
medication, procedure). Respond with a JSON array; each element has exactly these fields: \
\"surface\" (the exact text as it appears), \"normalized\" (a lowercase canonical form), and \
\"occurrences\" (an array of {\"line_no\", \"char_start\", \"char_end\"} giving every place the \
term appears, with char_start/char_end as character offsets into that line's text, end-exclusive). \
Never invent a line number that is not present in the transcript.";

#[derive(Debug, Deserialize)]
struct RawOccurrence {
    line_no: u32,
    char_start: usize,
    char_end: usize,
}

#[derive(Debug, Deserialize)]
struct RawTerm {
    surface: String,
    normalized: String,
    occurrences: Vec<RawOccurrence>,
}

fn numbered_transcript(lines: &[LineRecord]) -> String {
    lines
        .iter()
        .map(|l| match &l.speaker {
            Some(speaker) => format!("{}: {}: {}", l.line_no, speaker, l.text),
            None => format!("{}: {}", l.line_no, l.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validate one occurrence against the normalized transcript: the line
/// must exist and the span must lie inside it. Invalid occurrences are
/// dropped rather than failing the whole term (the extractor never
/// invents line numbers that survive into output — §4.4).
fn verify_occurrence(lines_by_no: &HashMap<u32, &LineRecord>, raw: &RawOccurrence) -> Option<Occurrence> {
    let line = lines_by_no.get(&raw.line_no)?;
    let char_count = line.text.chars().count();
    if raw.char_start >= raw.char_end || raw.char_end > char_count {
        return None;
    }
    Some(Occurrence {
        line_no: raw.line_no,
        char_start: raw.char_start,
        char_end: raw.char_end,
    })
}

async fn extract_window(llm: &LlmRouter, window_lines: &[LineRecord]) -> Result<Vec<RawTerm>> {
    let prompt = format!(
        "Transcript:\n{}\n\nReturn only the JSON array described above, nothing else.",
        numbered_transcript(window_lines)
    );
    let value = llm
        .complete_json(JsonCompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt,
            max_tokens: 4_096,
        })
        .await?;

    let terms: Vec<RawTerm> = serde_json::from_value(value)
        .map_err(|e| Error::LlmInvalidOutput(format!("term extraction output did not match schema: {e}")))?;
    Ok(terms)
}

fn merge_terms(passes: Vec<Vec<RawTerm>>, lines_by_no: &HashMap<u32, &LineRecord>) -> Vec<TermCandidate> {
    let mut by_normalized: HashMap<String, TermCandidate> = HashMap::new();

    for pass in passes {
        for raw in pass {
            let occurrences: Vec<Occurrence> = raw
                .occurrences
                .iter()
                .filter_map(|o| verify_occurrence(lines_by_no, o))
                .collect();
            if occurrences.is_empty() {
                continue;
            }

            let entry = by_normalized
                .entry(raw.normalized.clone())
                .or_insert_with(|| TermCandidate {
                    surface: raw.surface.clone(),
                    normalized: raw.normalized.clone(),
                    occurrences: Vec::new(),
                });

            for occ in occurrences {
                if !entry.occurrences.iter().any(|e| {
                    e.line_no == occ.line_no && e.char_start == occ.char_start && e.char_end == occ.char_end
                }) {
                    entry.occurrences.push(occ);
                }
            }
        }
    }

    by_normalized.into_values().collect()
}

/// Extract candidate medical terms from the full transcript. Windows and
/// merges automatically when the transcript exceeds `max_context_chars`.
pub async fn extract(
    lines: &[LineRecord],
    llm: &LlmRouter,
    chunk_policy: &ChunkerConfig,
    max_context_chars: usize,
) -> Result<Vec<TermCandidate>> {
    if lines.is_empty() {
        return Ok(Vec::new());
    }

    let lines_by_no: HashMap<u32, &LineRecord> = lines.iter().map(|l| (l.line_no, l)).collect();
    let full_text = numbered_transcript(lines);

    let passes = if full_text.len() <= max_context_chars {
        vec![extract_window(llm, lines).await?]
    } else {
        tracing::info!(
            transcript_chars = full_text.len(),
            max_context_chars,
            "transcript exceeds extractor context, windowing"
        );
        let windows = chunk_lines("__term_extraction__", lines, chunk_policy);
        let mut passes = Vec::with_capacity(windows.len());
        for window in &windows {
            let window_lines: Vec<LineRecord> = lines
                .iter()
                .filter(|l| l.line_no >= window.line_span.first && l.line_no <= window.line_span.last)
                .cloned()
                .collect();
            passes.push(extract_window(llm, &window_lines).await?);
        }
        passes
    };

    Ok(merge_terms(passes, &lines_by_no))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ce_llm::{LlmProvider, ProviderRegistry, TextCompletionRequest, TextCompletionResponse};
    use ce_domain::config::{RetryConfig, TimeoutsConfig};
    use serde_json::json;
    use std::sync::Arc;

    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_id(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "test-model"
        }
        async fn complete_json(&self, _request: JsonCompletionRequest) -> Result<serde_json::Value> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
        async fn complete_text(&self, _request: TextCompletionRequest) -> Result<TextCompletionResponse> {
            unimplemented!()
        }
    }

    fn router(responses: Vec<serde_json::Value>) -> LlmRouter {
        let provider = Arc::new(ScriptedProvider {
            responses: std::sync::Mutex::new(responses),
        }) as Arc<dyn LlmProvider>;
        let registry = ProviderRegistry::from_providers(vec![provider]);
        LlmRouter::new(
            registry,
            RetryConfig {
                r_max: 1,
                backoff_base_ms: 1,
                backoff_cap_ms: 1,
            },
            &TimeoutsConfig {
                section_timeout_sec: 30,
                job_timeout_sec: 1200,
                llm_timeout_sec: 20,
            },
            None,
            None,
        )
    }

    fn line(n: u32, text: &str) -> LineRecord {
        LineRecord {
            line_no: n,
            speaker: None,
            text: text.to_string(),
            byte_start: 0,
            byte_end: text.len(),
        }
    }

    #[tokio::test]
    async fn extracts_and_verifies_occurrences() {
        let lines = vec![line(1, "I have a headache and fever")];
        let response = json!([
            {"surface": "headache", "normalized": "headache", "occurrences": [{"line_no": 1, "char_start": 9, "char_end": 17}]},
        ]);
        let llm = router(vec![response]);
        let terms = extract(&lines, &llm, &ChunkerConfig::default(), DEFAULT_MAX_CONTEXT_CHARS).await.unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].normalized, "headache");
    }

    #[tokio::test]
    async fn invented_line_numbers_are_discarded() {
        let lines = vec![line(1, "fine")];
        let response = json!([
            {"surface": "x", "normalized": "x", "occurrences": [{"line_no": 999, "char_start": 0, "char_end": 1}]},
        ]);
        let llm = router(vec![response]);
        let terms = extract(&lines, &llm, &ChunkerConfig::default(), DEFAULT_MAX_CONTEXT_CHARS).await.unwrap();
        assert!(terms.is_empty());
    }

    #[tokio::test]
    async fn out_of_bounds_span_is_discarded() {
        let lines = vec![line(1, "short")];
        let response = json!([
            {"surface": "x", "normalized": "x", "occurrences": [{"line_no": 1, "char_start": 0, "char_end": 100}]},
        ]);
        let llm = router(vec![response]);
        let terms = extract(&lines, &llm, &ChunkerConfig::default(), DEFAULT_MAX_CONTEXT_CHARS).await.unwrap();
        assert!(terms.is_empty());
    }

    #[tokio::test]
    async fn duplicate_terms_across_windows_are_merged() {
        let lines: Vec<LineRecord> = (1..=4).map(|n| line(n, "a headache line with enough padding text")).collect();
        let pass1 = json!([
            {"surface": "headache", "normalized": "headache", "occurrences": [{"line_no": 1, "char_start": 2, "char_end": 10}]},
        ]);
        let pass2 = json!([
            {"surface": "headache", "normalized": "headache", "occurrences": [{"line_no": 3, "char_start": 2, "char_end": 10}]},
        ]);
        let llm = router(vec![pass1, pass2]);
        let policy = ChunkerConfig {
            target_tokens: 100,
            overlap_tokens: 0,
            respect_speaker_boundaries: false,
            min_lines: 2,
            max_lines: 2,
        };
        let terms = extract(&lines, &llm, &policy, 1).await.unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].occurrences.len(), 2);
    }

    #[tokio::test]
    async fn empty_transcript_yields_no_terms() {
        let llm = router(vec![]);
        let terms = extract(&[], &llm, &ChunkerConfig::default(), DEFAULT_MAX_CONTEXT_CHARS).await.unwrap();
        assert!(terms.is_empty());
    }
}
