//! Content-addressed embedding cache
//!
//! One file per vector, keyed by model, embedding kind and text hash, so
//! identical chunks are embedded once across documents and runs.

use crate::capability::{EmbedKind, RemoteCapability};
use crate::error::{AnalysisError, CapabilityError, Stage};
use crate::retry::RetryPolicy;
use regscope_core::ContentHash;
use regscope_store::{atomic, DataDir, StoreError};

/// Disk cache of embedding vectors
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    data: DataDir,
}

/// Inputs shared by every batch of one embedding pass
#[derive(Debug, Clone, Copy)]
pub struct EmbedRequest<'a> {
    pub model: &'a str,
    pub kind: EmbedKind,
    pub batch_size: usize,
    pub retry: &'a RetryPolicy,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    fn key(kind: EmbedKind, text: &str) -> ContentHash {
        ContentHash::compute_fields(&[kind.as_str().as_bytes(), text.as_bytes()])
    }

    /// Cached vector, `None` on a miss or an unreadable entry
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the cache cannot be read
    pub fn get(&self, model: &str, kind: EmbedKind, text: &str) -> Result<Option<Vec<f32>>, StoreError> {
        let path = self.data.embedding(model, &Self::key(kind, text));
        let Some(bytes) = atomic::read_bytes(&path)? else {
            return Ok(None);
        };
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            tracing::warn!(path = %path.display(), "ignoring malformed cached embedding");
            return Ok(None);
        }
        Ok(Some(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ))
    }

    /// # Errors
    /// Returns [`StoreError::Io`] if the vector cannot be written
    pub fn put(&self, model: &str, kind: EmbedKind, text: &str, vector: &[f32]) -> Result<(), StoreError> {
        let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
        atomic::write_bytes(&self.data.embedding(model, &Self::key(kind, text)), &bytes)
    }

    /// Vectors for `texts`, embedding only cache misses in batches
    ///
    /// # Errors
    /// [`AnalysisError::Failed`] at [`Stage::Embed`] when a batch exhausts
    /// its retries or returns the wrong number of vectors
    pub async fn embed_all(
        &self,
        capability: &dyn RemoteCapability,
        request: EmbedRequest<'_>,
        texts: &[&str],
    ) -> Result<Vec<Vec<f32>>, AnalysisError> {
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let cached = self.get(request.model, request.kind, text)?;
            if cached.is_none() {
                misses.push(i);
            }
            vectors.push(cached);
        }
        tracing::debug!(
            texts = texts.len(),
            cached = texts.len() - misses.len(),
            kind = request.kind.as_str(),
            "embedding cache lookup"
        );

        for batch in misses.chunks(request.batch_size.max(1)) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].to_string()).collect();
            let batch_texts = &batch_texts;
            let embedded = request
                .retry
                .run(Stage::Embed, || async move {
                    let out = capability
                        .embed(request.model, batch_texts, request.kind)
                        .await?;
                    if out.len() == batch_texts.len() && out.iter().all(|v| !v.is_empty()) {
                        Ok(out)
                    } else {
                        Err(CapabilityError::InvalidResponse(format!(
                            "expected {} embeddings, got {}",
                            batch_texts.len(),
                            out.len()
                        )))
                    }
                })
                .await?;
            for (&i, vector) in batch.iter().zip(embedded) {
                self.put(request.model, request.kind, texts[i], &vector)?;
                vectors[i] = Some(vector);
            }
        }

        vectors
            .into_iter()
            .map(|v| {
                v.ok_or_else(|| AnalysisError::Failed {
                    stage: Stage::Embed,
                    attempts: 0,
                    last_error: "embedding missing after batch".to_string(),
                })
            })
            .collect()
    }
}
