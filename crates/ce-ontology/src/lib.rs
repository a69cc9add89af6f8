//! Ontology Client — resolves candidate terms against a clinical concept
//! graph (§4.5). `{resolve, hierarchy}` is the capability interface duck-typed
//! ontology clients collapse into (§9).

use std::collections::HashMap;

use async_trait::async_trait;
use ce_domain::model::{ConceptMapping, TermCandidate};
use ce_domain::Result;
use parking_lot::RwLock;

#[async_trait]
pub trait OntologyClient: Send + Sync {
    /// Resolve candidates to up to `n_max` best concepts each. Terms that
    /// cannot be resolved are simply absent from the result — partial
    /// outage degrades confidence downstream, it never fails the call
    /// (§9 open question resolution).
    async fn resolve(
        &self,
        candidates: &[TermCandidate],
        language: &str,
        n_max: usize,
    ) -> Result<Vec<ConceptMapping>>;

    /// Parent/child concept ids for a concept, broader-first.
    async fn hierarchy(&self, concept_id: &str) -> Result<Vec<String>>;
}

struct ConceptEntry {
    concept_id: &'static str,
    preferred_en: &'static str,
    preferred_fr: &'static str,
    synonyms: &'static [&'static str],
    parent: Option<&'static str>,
}

/// A small built-in clinical concept lexicon. A production deployment wires
/// the same trait to a real concept graph service; this is the concrete
/// client the engine boots with.
const LEXICON: &[ConceptEntry] = &[
    ConceptEntry {
        concept_id: "38341003",
        preferred_en: "Hypertensive disorder",
        preferred_fr: "Hypertension",
        synonyms: &["hypertension", "htn", "high blood pressure"],
        parent: Some("49601007"),
    },
    ConceptEntry {
        concept_id: "49601007",
        preferred_en: "Disorder of cardiovascular system",
        preferred_fr: "Trouble cardiovasculaire",
        synonyms: &["cardiovascular disorder"],
        parent: None,
    },
    ConceptEntry {
        concept_id: "73211009",
        preferred_en: "Diabetes mellitus",
        preferred_fr: "Diabete",
        synonyms: &["diabetes", "dm", "diabete sucre"],
        parent: None,
    },
    ConceptEntry {
        concept_id: "25064002",
        preferred_en: "Headache",
        preferred_fr: "Cephalee",
        synonyms: &["headache", "cephalgia", "mal de tete"],
        parent: None,
    },
    ConceptEntry {
        concept_id: "386661006",
        preferred_en: "Fever",
        preferred_fr: "Fievre",
        synonyms: &["fever", "pyrexia", "fievre"],
        parent: None,
    },
    ConceptEntry {
        concept_id: "21522001",
        preferred_en: "Abdominal pain",
        preferred_fr: "Douleur abdominale",
        synonyms: &["abdominal pain", "stomach ache", "douleur abdominale"],
        parent: None,
    },
];

fn preferred_for(entry: &ConceptEntry, language: &str) -> String {
    if language == "fr" {
        entry.preferred_fr.to_string()
    } else {
        entry.preferred_en.to_string()
    }
}

/// Score a normalized term against a lexicon entry: 1.0 exact match on
/// preferred/synonym, scaled down for substring containment, 0 otherwise.
fn match_confidence(normalized: &str, entry: &ConceptEntry, language: &str) -> f32 {
    let preferred = preferred_for(entry, language).to_lowercase();
    if normalized == preferred {
        return 1.0;
    }
    if entry.synonyms.iter().any(|s| *s == normalized) {
        return 0.95;
    }
    if preferred.contains(normalized) || normalized.contains(&preferred) {
        return 0.75;
    }
    if entry
        .synonyms
        .iter()
        .any(|s| s.contains(normalized) || normalized.contains(s))
    {
        return 0.65;
    }
    0.0
}

/// In-memory lexicon-backed ontology client with a job-scope resolution
/// cache (§4.5: "results are cached within the job scope").
pub struct LexiconOntologyClient {
    cache: RwLock<HashMap<(String, String), Vec<ConceptMapping>>>,
}

impl LexiconOntologyClient {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn resolve_one(&self, normalized: &str, language: &str, n_max: usize) -> Vec<ConceptMapping> {
        let key = (language.to_string(), normalized.to_string());
        if let Some(cached) = self.cache.read().get(&key) {
            return cached.clone();
        }

        let mut scored: Vec<(f32, &ConceptEntry)> = LEXICON
            .iter()
            .map(|e| (match_confidence(normalized, e, language), e))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n_max);

        let mappings: Vec<ConceptMapping> = scored
            .into_iter()
            .map(|(score, entry)| ConceptMapping {
                original_term: normalized.to_string(),
                concept_id: entry.concept_id.to_string(),
                preferred_term: preferred_for(entry, language),
                language: language.to_string(),
                confidence: score,
            })
            .collect();

        self.cache.write().insert(key, mappings.clone());
        mappings
    }
}

impl Default for LexiconOntologyClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OntologyClient for LexiconOntologyClient {
    async fn resolve(
        &self,
        candidates: &[TermCandidate],
        language: &str,
        n_max: usize,
    ) -> Result<Vec<ConceptMapping>> {
        let mut out = Vec::new();
        for c in candidates {
            out.extend(self.resolve_one(&c.normalized, language, n_max));
        }
        Ok(out)
    }

    async fn hierarchy(&self, concept_id: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut current = LEXICON.iter().find(|e| e.concept_id == concept_id);
        while let Some(entry) = current {
            if let Some(parent_id) = entry.parent {
                chain.push(parent_id.to_string());
                current = LEXICON.iter().find(|e| e.concept_id == parent_id);
            } else {
                break;
            }
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(surface: &str, normalized: &str) -> TermCandidate {
        TermCandidate {
            surface: surface.to_string(),
            normalized: normalized.to_string(),
            occurrences: vec![],
        }
    }

    #[tokio::test]
    async fn exact_synonym_resolves_with_high_confidence() {
        let client = LexiconOntologyClient::new();
        let mappings = client
            .resolve(&[candidate("Hypertension", "hypertension")], "en", 5)
            .await
            .unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].preferred_term, "Hypertensive disorder");
        assert!(mappings[0].confidence >= 0.9);
    }

    #[tokio::test]
    async fn unresolvable_term_returns_empty_not_error() {
        let client = LexiconOntologyClient::new();
        let mappings = client
            .resolve(&[candidate("xyzzy", "xyzzy")], "en", 5)
            .await
            .unwrap();
        assert!(mappings.is_empty());
    }

    #[tokio::test]
    async fn respects_n_max() {
        let client = LexiconOntologyClient::new();
        let mappings = client
            .resolve(&[candidate("fever", "fever")], "en", 0)
            .await
            .unwrap();
        assert!(mappings.is_empty());
    }

    #[tokio::test]
    async fn french_language_uses_french_preferred_term() {
        let client = LexiconOntologyClient::new();
        let mappings = client
            .resolve(&[candidate("fievre", "fievre")], "fr", 5)
            .await
            .unwrap();
        assert_eq!(mappings[0].preferred_term, "Fievre");
    }

    #[tokio::test]
    async fn hierarchy_returns_parent_chain() {
        let client = LexiconOntologyClient::new();
        let chain = client.hierarchy("38341003").await.unwrap();
        assert_eq!(chain, vec!["49601007".to_string()]);
    }

    #[tokio::test]
    async fn repeated_resolution_is_cached() {
        let client = LexiconOntologyClient::new();
        let first = client
            .resolve(&[candidate("hypertension", "hypertension")], "en", 5)
            .await
            .unwrap();
        let second = client
            .resolve(&[candidate("hypertension", "hypertension")], "en", 5)
            .await
            .unwrap();
        assert_eq!(first[0].concept_id, second[0].concept_id);
    }
}
