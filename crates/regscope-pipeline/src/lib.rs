//! Regscope Pipeline - Run Orchestrator
//!
//! Ties the snapshot store, document workspaces and analysis engine into
//! resumable runs:
//! - [`Orchestrator::run`] expands a scope into document units
//! - [`Orchestrator::resume`] continues whatever is not `done`
//! - [`export()`] flattens a run into one row per unit

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod state;
mod writer;

pub use config::{PipelineConfig, RateTier};
pub use error::PipelineError;
pub use export::{export, Export, ExportRow};
pub use orchestrator::{CancelHandle, Orchestrator, RunOutcome};
pub use state::{
    list_runs, load_state, RunState, RunSummary, StatusCounts, UnitEntry, UnitRecord, UnitStatus,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
