//! Vector Index Client — per-conversation chunk storage and similarity
//! retrieval (§4.3).
//!
//! `upsert`/`query`/`drop` form the capability interface duck-typed RAG
//! clients collapse into (§9). The in-memory implementation here is the
//! concrete client this engine boots with; a networked implementation would
//! satisfy the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use ce_domain::model::Chunk;
use ce_domain::{Error, Result};
use parking_lot::RwLock;

/// Either raw text (embedded internally) or a precomputed embedding.
pub enum QueryInput {
    Text(String),
    Embedding(Vec<f32>),
}

/// A retrieved chunk plus its similarity score in `[0,1]`.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndexClient: Send + Sync {
    async fn upsert(&self, conversation_id: &str, chunks: Vec<Chunk>) -> Result<()>;
    async fn query(&self, conversation_id: &str, input: QueryInput, k: usize) -> Result<Vec<ChunkHit>>;
    async fn drop(&self, conversation_id: &str) -> Result<()>;
}

/// Check whether a vector is (approximately) L2-normalized.
fn is_l2_normalized(v: &[f32]) -> bool {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    (norm - 1.0).abs() < 1e-3
}

fn validate_embedding_vector(v: &[f32]) -> Result<()> {
    if v.is_empty() {
        return Err(Error::InvalidRequest("embedding vector is empty".to_string()));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(Error::InvalidRequest(
            "embedding vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Deterministic, dependency-free "embedding" used when a caller queries by
/// raw text and the chunks were embedded the same way at upsert time. A real
/// deployment swaps this for an embedding-model-backed implementation behind
/// the same trait; the scoring and isolation guarantees are unaffected.
pub fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0f32; dims];
    for (i, byte) in text.bytes().enumerate() {
        v[i % dims] += byte as f32;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

const DEFAULT_DIMS: usize = 32;

#[derive(Default)]
struct ConversationIndex {
    chunks: HashMap<String, Chunk>,
}

/// In-memory vector index, isolated per `conversation_id`.
pub struct InMemoryVectorIndex {
    conversations: RwLock<HashMap<String, ConversationIndex>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndexClient for InMemoryVectorIndex {
    async fn upsert(&self, conversation_id: &str, chunks: Vec<Chunk>) -> Result<()> {
        let mut conversations = self.conversations.write();
        let entry = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(ConversationIndex::default);

        for mut c in chunks {
            if c.conversation_id != conversation_id {
                return Err(Error::InvalidRequest(format!(
                    "chunk {} belongs to conversation {}, not {conversation_id}",
                    c.chunk_id, c.conversation_id
                )));
            }
            let embedding = match &c.embedding {
                Some(e) => {
                    validate_embedding_vector(e)?;
                    e.clone()
                }
                None => {
                    let e = hash_embed(&c.text, DEFAULT_DIMS);
                    c.embedding = Some(e.clone());
                    e
                }
            };
            debug_assert!(is_l2_normalized(&embedding) || embedding.iter().all(|x| *x == 0.0));
            // idempotent: overwrite by chunk_id
            entry.chunks.insert(c.chunk_id.clone(), c);
        }
        Ok(())
    }

    async fn query(&self, conversation_id: &str, input: QueryInput, k: usize) -> Result<Vec<ChunkHit>> {
        let query_embedding = match input {
            QueryInput::Embedding(e) => {
                validate_embedding_vector(&e)?;
                e
            }
            QueryInput::Text(t) => hash_embed(&t, DEFAULT_DIMS),
        };

        let conversations = self.conversations.read();
        let Some(index) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<ChunkHit> = index
            .chunks
            .values()
            .map(|c| {
                let score = match &c.embedding {
                    Some(e) => cosine_similarity(e, &query_embedding),
                    None => 0.0,
                };
                ChunkHit {
                    chunk: c.clone(),
                    score,
                }
            })
            .collect();

        // Highest similarity first; ties broken by lower line_span.first (§4.9).
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.line_span.first.cmp(&b.chunk.line_span.first))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn drop(&self, conversation_id: &str) -> Result<()> {
        self.conversations.write().remove(conversation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_domain::model::LineSpan;

    fn chunk(id: &str, conv: &str, first: u32, last: u32, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            conversation_id: conv.to_string(),
            line_span: LineSpan { first, last },
            text: text.to_string(),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_chunk_id() {
        let idx = InMemoryVectorIndex::new();
        idx.upsert("c1", vec![chunk("a", "c1", 1, 2, "hello world")])
            .await
            .unwrap();
        idx.upsert("c1", vec![chunk("a", "c1", 1, 2, "hello world updated")])
            .await
            .unwrap();

        let hits = idx
            .query("c1", QueryInput::Text("hello world".into()), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "hello world updated");
    }

    #[tokio::test]
    async fn queries_never_cross_conversations() {
        let idx = InMemoryVectorIndex::new();
        idx.upsert("c1", vec![chunk("a", "c1", 1, 1, "alpha")])
            .await
            .unwrap();
        idx.upsert("c2", vec![chunk("b", "c2", 1, 1, "beta")])
            .await
            .unwrap();

        let hits = idx.query("c1", QueryInput::Text("alpha".into()), 10).await.unwrap();
        assert!(hits.iter().all(|h| h.chunk.conversation_id == "c1"));

        let hits2 = idx.query("unknown", QueryInput::Text("alpha".into()), 10).await.unwrap();
        assert!(hits2.is_empty());
    }

    #[tokio::test]
    async fn ties_break_by_lower_line_span_first() {
        let idx = InMemoryVectorIndex::new();
        // Identical text -> identical embeddings -> identical scores.
        idx.upsert(
            "c1",
            vec![
                chunk("b", "c1", 5, 6, "same text"),
                chunk("a", "c1", 1, 2, "same text"),
            ],
        )
        .await
        .unwrap();

        let hits = idx.query("c1", QueryInput::Text("same text".into()), 10).await.unwrap();
        assert_eq!(hits[0].chunk.line_span.first, 1);
        assert_eq!(hits[1].chunk.line_span.first, 5);
    }

    #[tokio::test]
    async fn rejects_mismatched_conversation_id() {
        let idx = InMemoryVectorIndex::new();
        let result = idx.upsert("c1", vec![chunk("a", "other", 1, 1, "x")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn drop_removes_all_chunks_for_conversation() {
        let idx = InMemoryVectorIndex::new();
        idx.upsert("c1", vec![chunk("a", "c1", 1, 1, "x")]).await.unwrap();
        idx.drop("c1").await.unwrap();
        let hits = idx.query("c1", QueryInput::Text("x".into()), 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
