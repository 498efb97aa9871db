//! Structure provider interface
//!
//! Read-only source of the code tree, the register citations embedded in
//! each part's text, and the register listings marked as affecting each
//! part. Implementations are expected to be slow and unreliable.

use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::NaiveDate;
use regscope_core::{CodeNode, DocumentId, PartRef, SnapshotDate};
use serde::{Deserialize, Serialize};

/// Division of a part in which citations were found
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Division {
    /// Division name, e.g. `§ 180.1`
    pub name: String,
    /// Division type, e.g. `SECTION`, `APPENDIX`, `EXTRACT`
    pub kind: String,
}

impl Division {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// Source-note text found in a part, with its containing division
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationSite {
    pub division: Division,
    /// Raw text, may hold several register citations
    pub text: String,
}

/// Register search result for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterListing {
    pub document_number: DocumentId,
    /// Page citation of the first page, e.g. `77 FR 46288`
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub start_page: Option<u32>,
    #[serde(default)]
    pub end_page: Option<u32>,
    pub publication_date: NaiveDate,
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub agency_names: Vec<String>,
    #[serde(default)]
    pub significant: bool,
    /// Parts the register says the document affects
    #[serde(default)]
    pub cfr_references: Vec<PartRef>,
}

/// Source of structure and attribution data for a snapshot date
#[async_trait]
pub trait StructureProvider: Send + Sync {
    /// Every title of the code as of `date`
    async fn titles(&self, date: SnapshotDate) -> Result<Vec<CodeNode>, ProviderError>;

    /// Citation-bearing source notes inside one part
    async fn part_citations(
        &self,
        date: SnapshotDate,
        part: &PartRef,
    ) -> Result<Vec<CitationSite>, ProviderError>;

    /// Register listings marked as affecting a part
    ///
    /// `register_part` is the numeric part number the register files the
    /// part under (see [`PartRef::register_part`]).
    async fn part_documents(
        &self,
        date: SnapshotDate,
        title: u16,
        register_part: &str,
    ) -> Result<Vec<RegisterListing>, ProviderError>;
}
