//! Regscope Core - shared vocabulary
//!
//! Types every component agrees on:
//! - [`ContentHash`] for content-addressed records
//! - [`DocumentId`], [`PartRef`], [`RunId`], [`SnapshotDate`]
//! - the [`CodeNode`] tree and [`Scope`] selection

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod hash;
pub mod ids;
pub mod scope;
pub mod structure;

pub use error::CoreError;
pub use hash::{ContentHash, HashError};
pub use ids::{validate_title, DocumentId, PartRef, RunId, SnapshotDate, RESERVED_TITLE, TITLE_RANGE};
pub use scope::Scope;
pub use structure::{path_key, part_ref, title_number, CodeNode, NodeKind};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
