//! Persisted snapshot records

use crate::provider::Division;
use chrono::{DateTime, NaiveDate, Utc};
use regscope_core::{DocumentId, PartRef, SnapshotDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One `(part, document, snapshot)` attribution
///
/// Edges are immutable; a newer snapshot supersedes them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionEdge {
    pub part: PartRef,
    pub document: DocumentId,
    pub observed_at: SnapshotDate,
    pub publication_date: NaiveDate,
    /// Listing citation, e.g. `77 FR 46288`
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub start_page: Option<u32>,
    /// Divisions of the part whose source notes cite the document
    #[serde(default)]
    pub divisions: Vec<Division>,
}

impl AttributionEdge {
    /// Legislative order: publication date, then register position
    #[must_use]
    pub fn sequence_cmp(&self, other: &Self) -> Ordering {
        self.publication_date
            .cmp(&other.publication_date)
            .then_with(|| self.register_position().cmp(&other.register_position()))
            .then_with(|| self.document.cmp(&other.document))
    }

    fn register_position(&self) -> (u32, u32) {
        let volume = self
            .citation
            .as_deref()
            .and_then(crate::citation::FrCitation::parse)
            .map_or(u32::MAX, |c| c.volume);
        (volume, self.start_page.unwrap_or(u32::MAX))
    }
}

/// Attribution outcome for one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartAttribution {
    pub part: PartRef,
    pub word_count: u64,
    /// False when provider calls for the part failed
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Distinct register citations found in the part
    #[serde(default)]
    pub citations: Vec<String>,
    /// Citations no listing could account for
    #[serde(default)]
    pub unattributed: Vec<String>,
    /// Listings the register marks as affecting the part
    #[serde(default)]
    pub documents_affecting: Vec<DocumentId>,
    /// Sorted oldest first
    #[serde(default)]
    pub edges: Vec<AttributionEdge>,
}

impl PartAttribution {
    /// Placeholder for a part whose provider calls failed
    #[must_use]
    pub fn unresolved(part: PartRef, word_count: u64, error: impl Into<String>) -> Self {
        Self {
            part,
            word_count,
            resolved: false,
            error: Some(error.into()),
            citations: Vec::new(),
            unattributed: Vec::new(),
            documents_affecting: Vec::new(),
            edges: Vec::new(),
        }
    }
}

/// Summary written last, marking a snapshot directory as usable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub date: SnapshotDate,
    pub created_at: DateTime<Utc>,
    pub titles: Vec<u16>,
    pub parts_total: usize,
    pub parts_resolved: usize,
    pub documents_attributed: usize,
    pub unresolved: Vec<PartRef>,
}

impl Manifest {
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Coverage of one part in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartCoverage {
    pub part: PartRef,
    pub resolved: bool,
    pub word_count: u64,
    pub citations: usize,
    pub citations_attributed: usize,
    pub unattributed: Vec<String>,
    pub documents_affecting: usize,
    pub documents_attributed: usize,
}

/// Triage report of attribution coverage over a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub snapshot: SnapshotDate,
    pub scope: String,
    /// Parts whose attribution was resolved
    pub covered: usize,
    pub total: usize,
    pub unresolved: Vec<PartRef>,
    pub total_word_count: u64,
    pub parts: Vec<PartCoverage>,
}

impl CoverageReport {
    /// Coverage entry for one part
    #[must_use]
    pub fn part(&self, part: &PartRef) -> Option<&PartCoverage> {
        self.parts.iter().find(|p| &p.part == part)
    }

    /// Fraction of found citations that were attributed
    #[must_use]
    pub fn citation_coverage(&self) -> f64 {
        let found: usize = self.parts.iter().map(|p| p.citations).sum();
        let attributed: usize = self.parts.iter().map(|p| p.citations_attributed).sum();
        if found == 0 {
            1.0
        } else {
            attributed as f64 / found as f64
        }
    }
}
