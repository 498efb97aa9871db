//! Error types for pipeline runs

use regscope_analysis::AnalysisError;
use regscope_core::{CoreError, RunId};
use regscope_snapshot::SnapshotError;
use regscope_store::StoreError;
use regscope_workspace::WorkspaceError;

/// Pipeline errors
///
/// Invalid scopes and settings are folded into
/// [`PipelineError::Configuration`] so callers can reject them before any
/// unit runs.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid configuration or scope
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Snapshot unavailable or unreadable
    #[error("snapshot error: {0}")]
    Snapshot(SnapshotError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("analysis error: {0}")]
    Analysis(AnalysisError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// No run with this id under the data directory
    #[error("unknown run {0}")]
    UnknownRun(RunId),

    /// The run state writer stopped before the run finished
    #[error("run state writer stopped: {0}")]
    Writer(String),
}

impl PipelineError {
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<SnapshotError> for PipelineError {
    fn from(e: SnapshotError) -> Self {
        if e.is_configuration() {
            Self::Configuration(e.to_string())
        } else {
            Self::Snapshot(e)
        }
    }
}

impl From<AnalysisError> for PipelineError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Configuration(reason) => Self::Configuration(reason),
            other => Self::Analysis(other),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(e: CoreError) -> Self {
        Self::Configuration(e.to_string())
    }
}
