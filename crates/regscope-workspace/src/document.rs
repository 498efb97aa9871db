//! Source document records

use crate::register::{AgencyInfo, RegisterDocument};
use chrono::{DateTime, NaiveDate, Utc};
use regscope_core::{ContentHash, DocumentId, PartRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Details of an ingested document, persisted as `details.toml`
///
/// The full text lives beside it in `full_text.txt`; `content_hash` is the
/// hash of that text and is checked whenever the text is read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    pub publication_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_page: Option<u32>,
    #[serde(default)]
    pub is_significant: bool,
    /// Issuing agency names, de-duplicated, register order
    #[serde(default)]
    pub issuing_agencies: Vec<String>,
    /// Agency name -> shorthand, for agencies the directory knows
    #[serde(default)]
    pub agency_shorthand: BTreeMap<String, String>,
    #[serde(default)]
    pub affected_parts: Vec<PartRef>,
    pub content_hash: ContentHash,
    pub word_count: u64,
    pub fetched_at: DateTime<Utc>,
}

impl SourceDocument {
    /// Build the record for a freshly fetched document
    #[must_use]
    pub fn from_register(
        document: &RegisterDocument,
        agencies: &[AgencyInfo],
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let meta = &document.metadata;
        let mut issuing_agencies: Vec<String> = Vec::new();
        for name in &meta.agency_names {
            let name = name.trim();
            if !name.is_empty() && !issuing_agencies.iter().any(|n| n == name) {
                issuing_agencies.push(name.to_string());
            }
        }
        let agency_shorthand = issuing_agencies
            .iter()
            .filter_map(|name| {
                agencies
                    .iter()
                    .find(|a| a.name.eq_ignore_ascii_case(name))
                    .map(|a| (name.clone(), a.short_name.clone()))
            })
            .collect();

        Self {
            id: meta.document_number.clone(),
            citation: meta.citation.clone(),
            title: meta.title.clone(),
            abstract_text: meta.abstract_text.clone(),
            publication_date: meta.publication_date,
            start_page: meta.start_page,
            end_page: meta.end_page,
            is_significant: meta.significant,
            issuing_agencies,
            agency_shorthand,
            affected_parts: meta.cfr_references.clone(),
            content_hash: ContentHash::compute(document.full_text.as_bytes()),
            word_count: document.full_text.split_whitespace().count() as u64,
            fetched_at,
        }
    }

    /// Equal in everything but the fetch time
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        Self {
            fetched_at: other.fetched_at,
            ..self.clone()
        } == *other
    }

    /// `the Environmental Protection Agency (EPA)` style names
    ///
    /// Only agencies with a known shorthand are named; when none is
    /// known every issuing agency is named without one.
    #[must_use]
    pub fn agency_phrases(&self) -> Vec<String> {
        let known: Vec<String> = self
            .issuing_agencies
            .iter()
            .filter_map(|name| {
                self.agency_shorthand
                    .get(name)
                    .map(|short| format!("the {name} ({short})"))
            })
            .collect();
        if known.is_empty() {
            self.issuing_agencies
                .iter()
                .map(|name| format!("the {name}"))
                .collect()
        } else {
            known
        }
    }
}
