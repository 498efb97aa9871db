//! Remote model capabilities
//!
//! Embedding, reranking and completion are provided by an external
//! service that is slow, rate-limited and intermittently unavailable.

use crate::error::CapabilityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether texts are embedded as corpus entries or as a search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedKind {
    Document,
    Query,
}

impl EmbedKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Query => "query",
        }
    }
}

/// One rerank result, `index` into the submitted documents
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance: f32,
}

/// Operations offered by the remote model provider
#[async_trait]
pub trait RemoteCapability: Send + Sync {
    /// One vector per text, in input order
    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, CapabilityError>;

    /// At most `top_n` hits, most relevant first
    async fn rerank(
        &self,
        model: &str,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, CapabilityError>;

    /// Free-text completion of `prompt` under `preamble`
    async fn complete(
        &self,
        model: &str,
        preamble: &str,
        prompt: &str,
    ) -> Result<String, CapabilityError>;
}
