//! Error types for the analysis engine

use regscope_store::StoreError;
use regscope_workspace::WorkspaceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure reported by a remote capability
#[derive(Debug, Clone, thiserror::Error)]
pub enum CapabilityError {
    /// Outage or timeout
    #[error("transient capability error: {0}")]
    Transient(String),

    /// Throttled by the provider
    #[error("rate limited{}", retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    /// Rejected request; retrying will not help
    #[error("permanent capability error: {0}")]
    Permanent(String),

    /// Response arrived but could not be used
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CapabilityError {
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Step of the per-document analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Chunk,
    Embed,
    Retrieve,
    Rerank,
    Judge,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Retrieve => "retrieve",
            Self::Rerank => "rerank",
            Self::Judge => "judge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis errors
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A stage gave up after its retry budget
    #[error("analysis failed at {stage} after {attempts} attempt(s): {last_error}")]
    Failed {
        stage: Stage,
        attempts: u32,
        last_error: String,
    },

    #[error("invalid analysis configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AnalysisError {
    /// The stage that failed, if any
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Failed { stage, .. } => Some(*stage),
            Self::Workspace(_) => Some(Stage::Load),
            _ => None,
        }
    }
}
