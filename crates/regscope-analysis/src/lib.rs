//! Regscope Analysis - Retrieval-Augmented Analysis Engine
//!
//! Answers a fixed question about each ingested document:
//! - [`chunk`] splits text deterministically
//! - [`embed`] caches vectors by content
//! - [`retrieve`] ranks and reranks chunks
//! - [`prompt`] and [`verdict`] build the judgment prompt and check the
//!   model's answer against what it was shown
//!
//! Remote calls go through a [`RemoteCapability`], normally wrapped in a
//! [`RateLimitedCapability`], and are retried per [`RetryPolicy`].

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod capability;
pub mod chunk;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod prompt;
pub mod retrieve;
pub mod retry;
pub mod verdict;

pub use capability::{EmbedKind, RemoteCapability, RerankHit};
pub use chunk::{ChunkIndex, ChunkParams, ChunkSpan};
pub use config::AnalysisConfig;
pub use embed::EmbeddingCache;
pub use engine::{load_result, AnalysisEngine, AnalysisResult, AnalyzeOptions};
pub use error::{AnalysisError, CapabilityError, Stage};
pub use limiter::{CallStats, Operation, RateLimit, RateLimitedCapability};
pub use retrieve::{Retrieval, ScoredChunk};
pub use retry::RetryPolicy;
pub use verdict::{Citation, DataQualityFlag};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
