//! Regscope Snapshot - Structure Snapshot Store
//!
//! Captures, for an explicit date, the code tree and for every part the
//! register documents that modified it:
//! - [`build`] resolves parts against a [`StructureProvider`] and persists
//!   the snapshot, partial or not
//! - [`Snapshot`] answers attribution, scope expansion and coverage
//!   queries against one captured date

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod build;
pub mod citation;
pub mod error;
pub mod model;
pub mod provider;
pub mod snapshot;

pub use build::{build, BuildOptions};
pub use citation::FrCitation;
pub use error::{ProviderError, SnapshotError};
pub use model::{AttributionEdge, CoverageReport, Manifest, PartAttribution, PartCoverage};
pub use provider::{CitationSite, Division, RegisterListing, StructureProvider};
pub use snapshot::Snapshot;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
