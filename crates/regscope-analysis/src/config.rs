//! Analysis configuration

use crate::chunk::ChunkParams;
use crate::error::AnalysisError;
use crate::prompt::{DEFAULT_PREAMBLE, DEFAULT_QUESTION};
use crate::retry::RetryPolicy;
use regscope_core::ContentHash;
use serde::{Deserialize, Serialize};

/// Everything that determines an analysis result, plus operational knobs
///
/// Results are stored under [`AnalysisConfig::version`], which hashes the
/// semantic fields only; `embed_batch` and `retry` may change freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub prompt_version: String,
    pub preamble: String,
    pub question_template: String,
    pub embed_model: String,
    pub rerank_model: String,
    pub completion_model: String,
    pub chunking: ChunkParams,
    pub retrieve_top_k: usize,
    pub rerank_top_n: usize,
    pub min_relevance: f32,
    pub max_prompt_chars: usize,
    pub embed_batch: usize,
    pub retry: RetryPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            prompt_version: "authority-v1".to_string(),
            preamble: DEFAULT_PREAMBLE.to_string(),
            question_template: DEFAULT_QUESTION.to_string(),
            embed_model: "embed-english-v3.0".to_string(),
            rerank_model: "rerank-english-v3.0".to_string(),
            completion_model: "command-r-plus".to_string(),
            chunking: ChunkParams::default(),
            retrieve_top_k: 15,
            rerank_top_n: 5,
            min_relevance: 0.1,
            max_prompt_chars: 24_000,
            embed_batch: 90,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SemanticFields<'a> {
    prompt_version: &'a str,
    preamble: &'a str,
    question_template: &'a str,
    embed_model: &'a str,
    rerank_model: &'a str,
    completion_model: &'a str,
    chunking: ChunkParams,
    retrieve_top_k: usize,
    rerank_top_n: usize,
    min_relevance: f32,
    max_prompt_chars: usize,
}

impl AnalysisConfig {
    #[must_use]
    pub fn with_top_k(mut self, k: usize, n: usize) -> Self {
        self.retrieve_top_k = k;
        self.rerank_top_n = n;
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkParams) -> Self {
        self.chunking = chunking;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Short content hash of the semantic fields
    #[must_use]
    pub fn version(&self) -> String {
        let fields = SemanticFields {
            prompt_version: &self.prompt_version,
            preamble: &self.preamble,
            question_template: &self.question_template,
            embed_model: &self.embed_model,
            rerank_model: &self.rerank_model,
            completion_model: &self.completion_model,
            chunking: self.chunking,
            retrieve_top_k: self.retrieve_top_k,
            rerank_top_n: self.rerank_top_n,
            min_relevance: self.min_relevance,
            max_prompt_chars: self.max_prompt_chars,
        };
        ContentHash::compute_serializable(&fields)
            .unwrap_or_else(|_| ContentHash::compute(format!("{fields:?}").as_bytes()))
            .short()
    }

    /// # Errors
    /// [`AnalysisError::Configuration`] describing the first problem found
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let problem = if self.retrieve_top_k == 0 {
            Some("retrieve_top_k must be positive".to_string())
        } else if self.rerank_top_n == 0 {
            Some("rerank_top_n must be positive".to_string())
        } else if self.rerank_top_n > self.retrieve_top_k {
            Some(format!(
                "rerank_top_n {} exceeds retrieve_top_k {}",
                self.rerank_top_n, self.retrieve_top_k
            ))
        } else if !(0.0..=1.0).contains(&self.min_relevance) {
            Some(format!("min_relevance {} outside [0, 1]", self.min_relevance))
        } else if self.embed_batch == 0 {
            Some("embed_batch must be positive".to_string())
        } else if self.retry.max_attempts == 0 {
            Some("retry.max_attempts must be positive".to_string())
        } else if self.max_prompt_chars <= self.preamble.len() {
            Some("max_prompt_chars leaves no room after the preamble".to_string())
        } else {
            self.chunking.problem()
        };
        match problem {
            Some(p) => Err(AnalysisError::Configuration(p)),
            None => Ok(()),
        }
    }
}
