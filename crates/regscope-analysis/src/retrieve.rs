//! Similarity ranking and the persisted retrieval record

use crate::capability::RerankHit;
use chrono::{DateTime, Utc};
use regscope_core::ContentHash;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub ordinal: usize,
    pub score: f32,
}

/// Outcome of retrieval for one document, reused by later attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    pub text_hash: ContentHash,
    pub query: String,
    /// Top-K by cosine similarity
    pub candidates: Vec<ScoredChunk>,
    /// Reranked survivors, `score` is the rerank relevance
    pub retained: Vec<ScoredChunk>,
    pub created_at: DateTime<Utc>,
}

impl Retrieval {
    #[must_use]
    pub fn retained_ordinals(&self) -> Vec<usize> {
        self.retained.iter().map(|c| c.ordinal).collect()
    }
}

/// Cosine similarity, zero for degenerate vectors
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// The `k` best chunks for `query`, ties broken by lower ordinal
#[must_use]
pub fn top_k(query: &[f32], embeddings: &[Vec<f32>], k: usize) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = embeddings
        .iter()
        .enumerate()
        .map(|(ordinal, v)| ScoredChunk {
            ordinal,
            score: cosine(query, v),
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });
    scored.truncate(k);
    scored
}

/// Map rerank hits back to chunk ordinals and drop weak ones
///
/// Returns `None` if a hit points outside `candidates`.
#[must_use]
pub fn apply_rerank(
    candidates: &[ScoredChunk],
    hits: &[RerankHit],
    top_n: usize,
    min_relevance: f32,
) -> Option<Vec<ScoredChunk>> {
    let mut retained: Vec<ScoredChunk> = Vec::with_capacity(hits.len());
    for hit in hits {
        let candidate = candidates.get(hit.index)?;
        if hit.relevance < min_relevance || retained.iter().any(|c| c.ordinal == candidate.ordinal) {
            continue;
        }
        retained.push(ScoredChunk {
            ordinal: candidate.ordinal,
            score: hit.relevance,
        });
    }
    retained.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });
    retained.truncate(top_n);
    Some(retained)
}
