//! Chunker — groups line records into overlapping semantic windows,
//! preserving line-number metadata for citation (§4.2).

use ce_domain::config::ChunkerConfig;
use ce_domain::model::{Chunk, LineRecord, LineSpan};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Approximate characters per token, consistent with the embedding model's
/// tokenizer within the margin this budget needs.
const CHARS_PER_TOKEN: usize = 4;

fn stable_chunk_id(conversation_id: &str, span: LineSpan) -> String {
    let mut hasher = DefaultHasher::new();
    conversation_id.hash(&mut hasher);
    span.first.hash(&mut hasher);
    span.last.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Split `lines` into overlapping [`Chunk`]s per `policy`. Never splits a
/// line; every line is covered by at least one chunk.
pub fn chunk(conversation_id: &str, lines: &[LineRecord], policy: &ChunkerConfig) -> Vec<Chunk> {
    if lines.is_empty() {
        return Vec::new();
    }

    let target_chars = policy.target_tokens * CHARS_PER_TOKEN;
    let overlap_chars = policy.overlap_tokens * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    let mut idx = 0usize;

    while idx < lines.len() {
        let start = idx;
        let mut end = start;
        let mut char_count = 0usize;

        while end < lines.len() {
            let line_chars = lines[end].text.len();
            let would_exceed_budget = end > start && char_count + line_chars > target_chars;
            let at_min_lines = (end - start) >= policy.min_lines;
            if would_exceed_budget && at_min_lines {
                break;
            }
            if (end - start + 1) > policy.max_lines {
                break;
            }
            char_count += line_chars;
            end += 1;
        }
        if end == start {
            end = start + 1;
        }

        if policy.respect_speaker_boundaries && end < lines.len() {
            // Prefer closing at a speaker turn, as long as we don't fall
            // below min_lines.
            let floor = start + policy.min_lines.max(1);
            let mut candidate = end;
            while candidate > floor {
                let turn = lines[candidate].speaker != lines[candidate - 1].speaker;
                if turn {
                    break;
                }
                candidate -= 1;
            }
            if candidate > floor || candidate == floor {
                end = candidate.max(start + 1);
            }
        }

        let span = LineSpan {
            first: lines[start].line_no,
            last: lines[end - 1].line_no,
        };
        let text = lines[start..end]
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        chunks.push(Chunk {
            chunk_id: stable_chunk_id(conversation_id, span),
            conversation_id: conversation_id.to_string(),
            line_span: span,
            text,
            embedding: None,
        });

        if end >= lines.len() {
            break;
        }

        // Walk back from `end` to find the overlap start for the next
        // chunk, drawing from the tail of this one.
        let mut overlap_count = 0usize;
        let mut back = end;
        while back > start {
            let prev_chars = lines[back - 1].text.len();
            if overlap_count + prev_chars > overlap_chars {
                break;
            }
            overlap_count += prev_chars;
            back -= 1;
        }
        idx = back.max(start + 1);
    }

    chunks
}
