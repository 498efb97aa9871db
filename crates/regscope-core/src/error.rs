//! Error types for shared vocabulary

use crate::hash::HashError;

/// Validation errors for ids, dates and scopes
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Document number is empty or not a safe path segment
    #[error("invalid document id: '{0}'")]
    InvalidDocumentId(String),

    /// Run id is not a ULID
    #[error("invalid run id: '{0}'")]
    InvalidRunId(String),

    /// Date is not `YYYY-MM-DD` or does not exist
    #[error("invalid date: '{0}'")]
    InvalidDate(String),

    /// Title outside the code or reserved
    #[error("invalid title {title}: {reason}")]
    InvalidTitle { title: u16, reason: String },

    /// Malformed part reference
    #[error("invalid part reference: '{0}'")]
    InvalidPart(String),

    /// Malformed or impossible scope
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// Hashing failed
    #[error(transparent)]
    Hash(#[from] HashError),
}
