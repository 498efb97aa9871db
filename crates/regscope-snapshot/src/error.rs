//! Error types for structure snapshots

use regscope_core::{CoreError, PartRef, SnapshotDate};
use regscope_store::StoreError;

/// Failure reported by a structure provider
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Outage or throttling; the same request may succeed later
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The request cannot succeed as issued
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Snapshot store errors
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Some parts could not be resolved; the rest was persisted
    #[error("snapshot {date} is incomplete: {} unresolved part(s)", unresolved.len())]
    Incomplete {
        date: SnapshotDate,
        unresolved: Vec<PartRef>,
    },

    /// The code tree itself could not be fetched
    #[error("provider failed: {0}")]
    Provider(#[from] ProviderError),

    /// No snapshot captured for the date
    #[error("no snapshot for {0}")]
    NotFound(SnapshotDate),

    /// The data directory holds no snapshot at all
    #[error("no snapshots captured yet")]
    NoSnapshots,

    /// Part not present in the snapshot
    #[error("unknown part {0}")]
    UnknownPart(PartRef),

    /// Scope cannot be expanded against this snapshot
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SnapshotError {
    /// Whether the snapshot is usable despite the error
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }

    /// Whether the error stems from an invalid request rather than data
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Core(_) | Self::UnknownPart(_))
    }
}
