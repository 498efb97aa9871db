//! Register page citations
//!
//! Source notes cite the register as `<volume> FR <page>`, usually with
//! a date (`77 FR 46290, Aug. 3, 2012`). A citation belongs to a listing
//! when the volumes match and the page falls inside the listing's page
//! range.

use crate::provider::RegisterListing;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([0-9]+)\s+FR\s+([0-9]+)\b").unwrap());

/// One `<volume> FR <page>` citation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrCitation {
    pub volume: u32,
    pub page: u32,
}

impl FrCitation {
    #[inline]
    #[must_use]
    pub const fn new(volume: u32, page: u32) -> Self {
        Self { volume, page }
    }

    /// Parse a single citation, ignoring any trailing date
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        scan(text).into_iter().next()
    }

    /// Whether this citation points into the listing's pages
    ///
    /// Listings without a citation never match.
    #[must_use]
    pub fn within(&self, listing: &RegisterListing) -> bool {
        let Some(first) = listing.citation.as_deref().and_then(Self::parse) else {
            return false;
        };
        let start = listing.start_page.unwrap_or(first.page);
        let end = listing.end_page.unwrap_or(start).max(start);
        first.volume == self.volume && (start..=end).contains(&self.page)
    }
}

impl fmt::Display for FrCitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} FR {}", self.volume, self.page)
    }
}

/// All distinct citations in a text, in order of first appearance
#[must_use]
pub fn scan(text: &str) -> Vec<FrCitation> {
    let mut out: Vec<FrCitation> = Vec::new();
    for caps in CITATION.captures_iter(text) {
        let (Some(volume), Some(page)) = (
            caps.get(1).and_then(|m| m.as_str().parse().ok()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
        ) else {
            continue;
        };
        let cite = FrCitation::new(volume, page);
        if !out.contains(&cite) {
            out.push(cite);
        }
    }
    out
}
