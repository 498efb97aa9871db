//! Regscope Workspace - Document Workspace Builder
//!
//! Turns register listings into immutable per-document workspaces
//! (`details.toml` plus `full_text.txt`) that downstream analysis reads
//! without touching the register again.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod builder;
pub mod document;
pub mod error;
pub mod register;

pub use builder::{IngestEntry, IngestOptions, IngestReport, IngestStatus, WorkspaceBuilder};
pub use document::SourceDocument;
pub use error::{RegisterError, WorkspaceError};
pub use register::{AgencyInfo, DocumentRegister, RegisterDocument};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
