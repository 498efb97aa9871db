//! Regscope Store - persisted state
//!
//! - [`DataDir`]: the on-disk layout every component writes into
//! - [`atomic`]: write-then-rename persistence for JSON, TOML and raw records
//! - [`RecordCache`]: moka-backed in-memory front for immutable records

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod atomic;
pub mod cache;
pub mod error;
pub mod layout;

pub use cache::{CacheStats, RecordCache};
pub use error::StoreError;
pub use layout::DataDir;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
