//! Transcript Normalizer — turns raw speaker-annotated text into a dense,
//! byte-addressed sequence of [`LineRecord`]s.

use ce_domain::model::LineRecord;
use ce_domain::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

fn numbered_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*[:|]\s*").unwrap())
}

fn speaker_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(doctor|patient|dr\.?|pt\.?|clinician|nurse)[:\s]+").unwrap()
    })
}

/// A small set of French stopwords used to heuristically detect language
/// when the caller doesn't supply a hint. Not a general-purpose detector —
/// good enough to pick between the two languages §1 supports.
const FRENCH_STOPWORDS: &[&str] = &["le", "la", "les", "et", "est", "je", "vous", "bonjour"];

/// Detect language from text when no hint was supplied.
fn detect_language(text: &str) -> String {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.is_empty() {
        return "en".to_string();
    }
    let french_hits = words
        .iter()
        .filter(|w| FRENCH_STOPWORDS.contains(&w.trim_matches(|c: char| !c.is_alphanumeric())))
        .count();
    if (french_hits as f64) / (words.len() as f64) > 0.05 {
        "fr".to_string()
    } else {
        "en".to_string()
    }
}

/// Split `text` on `\r\n`, bare `\r`, or bare `\n`, returning each line's
/// content (terminator excluded) alongside its `(byte_start, byte_end)` in
/// `text` itself. `\r`/`\n` are single ASCII bytes that never occur as a
/// continuation byte of a multi-byte UTF-8 sequence, so splitting on raw
/// bytes never lands inside a codepoint.
fn split_lines_with_offsets(text: &str) -> Vec<(usize, usize, &str)> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                out.push((start, i, &text[start..i]));
                i += 1;
                start = i;
            }
            b'\r' => {
                let end = i;
                i += 1;
                if i < bytes.len() && bytes[i] == b'\n' {
                    i += 1;
                }
                out.push((start, end, &text[start..end]));
                start = i;
            }
            _ => i += 1,
        }
    }
    out.push((start, bytes.len(), &text[start..bytes.len()]));
    out
}

/// Normalize raw transcript text into line records with stable byte offsets.
///
/// `language_hint`: `Some("en"|"fr")` to skip heuristic detection.
pub fn normalize(raw_text: &str, language_hint: Option<&str>, max_bytes: usize) -> Result<(Vec<LineRecord>, String)> {
    if raw_text.is_empty() {
        return Err(Error::InvalidTranscript("transcript is empty".to_string()));
    }
    if raw_text.len() > max_bytes {
        return Err(Error::InvalidTranscript(format!(
            "transcript is {} bytes, exceeds configured maximum of {max_bytes}",
            raw_text.len()
        )));
    }

    let language = language_hint
        .map(|s| s.to_string())
        .unwrap_or_else(|| detect_language(raw_text));

    let mut lines = Vec::new();
    let mut position_line_no: u32 = 0;
    let mut last_explicit_no: Option<u32> = None;
    let mut using_explicit_numbering = false;

    for (idx, (line_byte_start, line_byte_end, raw_line)) in split_lines_with_offsets(raw_text).into_iter().enumerate() {
        let trimmed_end = raw_line.trim_end();
        position_line_no += 1;

        let (line_no, remainder) = if let Some(caps) = numbered_prefix_re().captures(trimmed_end) {
            using_explicit_numbering = true;
            let n: u32 = caps[1].parse().map_err(|_| {
                Error::InvalidTranscript(format!("unparsable line number on input line {}", idx + 1))
            })?;
            if let Some(prev) = last_explicit_no {
                if n <= prev {
                    return Err(Error::InvalidTranscript(format!(
                        "explicit line numbers must strictly increase: {n} follows {prev}"
                    )));
                }
            }
            last_explicit_no = Some(n);
            let stripped = &trimmed_end[caps.get(0).unwrap().end()..];
            (n, stripped)
        } else {
            if using_explicit_numbering {
                return Err(Error::InvalidTranscript(
                    "mixed explicit and implicit line numbering".to_string(),
                ));
            }
            (position_line_no, trimmed_end)
        };

        let (speaker, text) = if let Some(caps) = speaker_prefix_re().captures(remainder) {
            let speaker = caps.get(1).unwrap().as_str().to_string();
            let text = &remainder[caps.get(0).unwrap().end()..];
            (Some(speaker), text.to_string())
        } else {
            (None, remainder.to_string())
        };

        lines.push(LineRecord {
            line_no,
            speaker,
            text,
            byte_start: line_byte_start,
            byte_end: line_byte_end,
        });
    }

    Ok((lines, language))
}

/// Reassemble line records back into transcript text (§8 invariant 8).
/// Valid only for transcripts without mixed line endings — the canonical
/// newline is always used on the way back.
pub fn reassemble(lines: &[LineRecord]) -> String {
    lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_transcript_is_invalid() {
        let result = normalize("", None, 1000);
        assert!(matches!(result, Err(Error::InvalidTranscript(_))));
    }

    #[test]
    fn oversize_transcript_is_invalid() {
        let text = "a".repeat(10);
        let result = normalize(&text, None, 5);
        assert!(matches!(result, Err(Error::InvalidTranscript(_))));
    }

    #[test]
    fn exactly_at_max_bytes_is_accepted() {
        let text = "a".repeat(10);
        let result = normalize(&text, None, 10);
        assert!(result.is_ok());
    }

    #[test]
    fn single_line_numbers_by_position() {
        let (lines, _) = normalize("hello world", Some("en"), 10_000).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_no, 1);
        assert_eq!(lines[0].text, "hello world");
    }

    #[test]
    fn explicit_numbering_is_authoritative() {
        let text = "1: Doctor: how are you\n3: Patient: fine";
        let (lines, _) = normalize(text, Some("en"), 10_000).unwrap();
        assert_eq!(lines[0].line_no, 1);
        assert_eq!(lines[1].line_no, 3);
        assert_eq!(lines[0].speaker.as_deref(), Some("Doctor"));
        assert_eq!(lines[1].speaker.as_deref(), Some("Patient"));
    }

    #[test]
    fn non_increasing_explicit_numbers_are_rejected() {
        let text = "2: one\n1: two";
        let result = normalize(text, Some("en"), 10_000);
        assert!(matches!(result, Err(Error::InvalidTranscript(_))));
    }

    #[test]
    fn speaker_prefixes_are_detected_without_explicit_numbering() {
        let text = "Doctor: how are you feeling\nPatient: a bit tired";
        let (lines, _) = normalize(text, Some("en"), 10_000).unwrap();
        assert_eq!(lines[0].speaker.as_deref(), Some("Doctor"));
        assert_eq!(lines[0].text, "how are you feeling");
        assert_eq!(lines[1].line_no, 2);
    }

    #[test]
    fn byte_offsets_track_original_utf8_input() {
        let text = "ab\ncd";
        let (lines, _) = normalize(text, Some("en"), 10_000).unwrap();
        assert_eq!(lines[0].byte_start, 0);
        assert_eq!(lines[0].byte_end, 2);
        assert_eq!(lines[1].byte_start, 3);
        assert_eq!(lines[1].byte_end, 5);
    }

    #[test]
    fn byte_offsets_track_original_crlf_input() {
        // "ab\r\ncd": line 2 starts at byte 4 in the original input, not 3
        // as it would if offsets were computed against a CRLF-collapsed copy.
        let text = "ab\r\ncd";
        let (lines, _) = normalize(text, Some("en"), 10_000).unwrap();
        assert_eq!(lines[0].byte_start, 0);
        assert_eq!(lines[0].byte_end, 2);
        assert_eq!(lines[1].byte_start, 4);
        assert_eq!(lines[1].byte_end, 6);
        assert_eq!(&text[lines[1].byte_start..lines[1].byte_end], "cd");
    }

    #[test]
    fn round_trip_reassembles_without_mixed_endings() {
        let text = "line one\nline two\nline three";
        let (lines, _) = normalize(text, Some("en"), 10_000).unwrap();
        assert_eq!(reassemble(&lines), text);
    }

    #[test]
    fn language_hint_is_honored_over_heuristic() {
        let (_, lang) = normalize("bonjour vous le la", Some("en"), 10_000).unwrap();
        assert_eq!(lang, "en");
    }

    #[test]
    fn language_is_detected_when_hint_absent() {
        let (_, lang) = normalize(
            "Bonjour, je vous remercie, la maladie est le probleme",
            None,
            10_000,
        )
        .unwrap();
        assert_eq!(lang, "fr");
    }
}
