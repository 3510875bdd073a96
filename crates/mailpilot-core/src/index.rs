//! In-memory session index for semantic email search
//!
//! Holds the messages of the current session together with their
//! embedding vectors. Rebuilt from scratch on every fetch; nothing is
//! persisted. When the embedding service is unavailable the index
//! degrades to case-insensitive lexical matching instead of failing.

use tracing::{debug, warn};

use crate::embedding::EmbeddingApi;
use crate::error::Result;
use crate::models::Message;

/// One indexed message: its id, embedding vector and a short snippet
/// used when rendering search results.
#[derive(Debug, Clone)]
pub struct EmbeddingEntry {
    pub message_id: String,
    pub vector: Vec<f32>,
    pub snippet: String,
}

/// A search result with its similarity score
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub message: Message,
    pub score: f32,
}

/// Session-scoped search index. Messages are stored newest first, which
/// makes recency the tie-break for equal scores.
#[derive(Default)]
pub struct SessionIndex {
    messages: Vec<Message>,
    entries: Vec<EmbeddingEntry>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether embedding vectors are available for ranking
    pub fn is_degraded(&self) -> bool {
        !self.messages.is_empty() && self.entries.is_empty()
    }

    /// Look up an indexed message by id
    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// All indexed messages, newest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replace the index contents with `messages` (expected newest
    /// first). Rebuilding with the same messages yields the same index;
    /// previous contents are always discarded.
    pub async fn build(
        &mut self,
        messages: Vec<Message>,
        embedder: &dyn EmbeddingApi,
    ) -> Result<()> {
        self.messages = messages;
        self.entries.clear();

        if self.messages.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = self.messages.iter().map(|m| m.searchable_text()).collect();
        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                self.entries = self
                    .messages
                    .iter()
                    .zip(vectors)
                    .map(|(m, vector)| EmbeddingEntry {
                        message_id: m.id.clone(),
                        vector,
                        snippet: m.header_line(),
                    })
                    .collect();
                debug!("Indexed {} messages with embeddings", self.entries.len());
                Ok(())
            }
            Err(e) if e.degrades_search() => {
                warn!("Embedding unavailable, search degraded to lexical: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Rank indexed messages against `query`, returning at most `k`
    /// hits. Falls back to lexical matching when the index was built
    /// degraded or the query embedding fails.
    pub async fn query(
        &self,
        query: &str,
        k: usize,
        embedder: &dyn EmbeddingApi,
    ) -> Result<Vec<SearchHit>> {
        if self.messages.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        if self.entries.is_empty() {
            return Ok(self.lexical_query(query, k));
        }

        let query_vector = match embedder.embed(query).await {
            Ok(v) => v,
            Err(e) if e.degrades_search() => {
                warn!("Query embedding failed, falling back to lexical: {}", e);
                return Ok(self.lexical_query(query, k));
            }
            Err(e) => return Err(e),
        };

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = cosine_similarity(&query_vector, &entry.vector);
                self.get(&entry.message_id).map(|m| SearchHit {
                    message: m.clone(),
                    score,
                })
            })
            .collect();

        // Stable sort: equal scores keep newest-first order.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    /// Case-insensitive substring match over subject, sender and body,
    /// newest first.
    fn lexical_query(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let needle = query.to_lowercase();
        self.messages
            .iter()
            .filter(|m| m.searchable_text().to_lowercase().contains(&needle))
            .take(k)
            .map(|m| SearchHit {
                message: m.clone(),
                score: 0.0,
            })
            .collect()
    }
}

/// Cosine similarity between two vectors. Returns 0 for mismatched
/// lengths or zero-norm vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
