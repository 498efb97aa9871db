//! Error types for the document workspace

use regscope_core::DocumentId;
use regscope_store::StoreError;

/// Failure reported by the document register
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegisterError {
    /// 5xx-class outage or throttling; retry later
    #[error("transient register error: {0}")]
    Transient(String),

    /// Malformed request or response; retrying will not help
    #[error("permanent register error: {0}")]
    Permanent(String),

    /// The register has no such document
    #[error("document {0} not found in register")]
    NotFound(DocumentId),
}

impl RegisterError {
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Workspace errors
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// No workspace exists for the document
    #[error("document {0} has not been ingested")]
    NotIngested(DocumentId),

    /// Stored text does not match the recorded content hash
    #[error("workspace for {id} is corrupt: {reason}")]
    Corrupt { id: DocumentId, reason: String },
}
