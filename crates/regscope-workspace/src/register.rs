//! Document register interface

use crate::error::RegisterError;
use async_trait::async_trait;
use regscope_core::DocumentId;
use regscope_snapshot::RegisterListing;
use serde::{Deserialize, Serialize};

/// Entry of the register's agency directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyInfo {
    pub name: String,
    /// Abbreviation, e.g. `EPA`
    pub short_name: String,
}

/// A fetched document: authoritative metadata plus full text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDocument {
    pub metadata: RegisterListing,
    pub full_text: String,
}

/// Read-only document register
#[async_trait]
pub trait DocumentRegister: Send + Sync {
    /// Metadata and full text of one document
    async fn fetch(&self, id: &DocumentId) -> Result<RegisterDocument, RegisterError>;

    /// The agency directory, used to attach shorthand names
    async fn agencies(&self) -> Result<Vec<AgencyInfo>, RegisterError>;
}
