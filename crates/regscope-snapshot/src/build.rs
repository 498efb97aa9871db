//! Snapshot capture
//!
//! Fetches the code tree for a date, resolves every non-reserved part
//! against the provider with bounded concurrency, attributes source-note
//! citations to register listings, and persists the result. The manifest
//! is written last; its presence marks the directory as a snapshot.
//! Captures are staged beside the snapshot directory and swapped in whole.

use crate::citation::{scan, FrCitation};
use crate::error::SnapshotError;
use crate::model::{AttributionEdge, Manifest, PartAttribution};
use crate::provider::{Division, RegisterListing, StructureProvider};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use regscope_core::{part_ref, title_number, CodeNode, DocumentId, PartRef, SnapshotDate};
use regscope_store::{atomic, DataDir};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

pub(crate) const STRUCTURE_FILE: &str = "structure.json";
pub(crate) const ATTRIBUTION_FILE: &str = "attribution.json";
pub(crate) const LISTINGS_FILE: &str = "listings.json";
pub(crate) const MANIFEST_FILE: &str = "manifest.json";

/// Options for [`build`]
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Rebuild even if a complete snapshot exists for the date
    pub force: bool,
    /// Parts resolved concurrently
    pub concurrency: usize,
}

impl BuildOptions {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            force: false,
            concurrency: 4,
        }
    }
}

/// Capture the snapshot for `date`
///
/// A complete snapshot already on disk is returned untouched unless
/// `options.force` is set. Rebuilding a partial snapshot re-resolves only
/// its unresolved parts. A part that was resolved before and fails again
/// keeps its previous attribution. The capture is written to a staging
/// directory and replaces the stored snapshot only once it is complete on
/// disk, so a failed rebuild leaves the previous snapshot usable.
///
/// # Errors
/// - [`SnapshotError::Incomplete`] if some parts could not be resolved;
///   everything else is persisted and the snapshot is usable
/// - [`SnapshotError::Provider`] if the code tree itself is unavailable
/// - [`SnapshotError::Store`] on persistence failure
pub async fn build(
    data: &DataDir,
    provider: &dyn StructureProvider,
    date: SnapshotDate,
    options: BuildOptions,
) -> Result<Manifest, SnapshotError> {
    let dir = data.snapshot_dir(date);
    if atomic::restore_dir(&dir)? {
        tracing::warn!(%date, "restored snapshot left aside by an interrupted rebuild");
    }

    let existing = atomic::read_json::<Manifest>(&dir.join(MANIFEST_FILE))?;
    if let Some(manifest) = &existing {
        if manifest.is_complete() && !options.force {
            tracing::info!(%date, "snapshot already captured");
            return Ok(manifest.clone());
        }
        if !manifest.is_complete() {
            tracing::info!(%date, unresolved = manifest.unresolved.len(), "rebuilding partial snapshot");
        }
    }
    let previous = match existing {
        Some(_) => Previous::load(&dir)?,
        None => Previous::default(),
    };

    let mut titles = match previous.titles.clone() {
        Some(titles) if !options.force => titles,
        _ => provider.titles(date).await?,
    };
    for title in &mut titles {
        title.roll_up_word_counts();
    }

    let parts = collect_parts(&titles);
    tracing::info!(%date, titles = titles.len(), parts = parts.len(), "capturing snapshot");

    let previous = &previous;
    let resolved: Vec<(PartAttribution, Vec<RegisterListing>)> = stream::iter(parts)
        .map(|(part, words)| async move {
            let earlier = previous.resolved(&part);
            if let Some(earlier) = earlier.filter(|_| !options.force) {
                return previous.carry(earlier, words);
            }
            let (attribution, listings) = resolve_part(provider, date, part, words).await;
            match earlier {
                Some(earlier) if !attribution.resolved => {
                    tracing::warn!(part = %earlier.part, "keeping previous attribution of unresolved part");
                    previous.carry(earlier, words)
                }
                _ => (attribution, listings),
            }
        })
        .buffered(options.concurrency.max(1))
        .collect()
        .await;

    let mut listings: IndexMap<DocumentId, RegisterListing> = IndexMap::new();
    let mut attributions = Vec::with_capacity(resolved.len());
    for (attribution, part_listings) in resolved {
        let attributed: BTreeSet<&DocumentId> =
            attribution.edges.iter().map(|e| &e.document).collect();
        for listing in part_listings {
            if attributed.contains(&listing.document_number) {
                listings
                    .entry(listing.document_number.clone())
                    .or_insert(listing);
            }
        }
        attributions.push(attribution);
    }

    let unresolved: Vec<PartRef> = attributions
        .iter()
        .filter(|a| !a.resolved)
        .map(|a| a.part.clone())
        .collect();
    let manifest = Manifest {
        date,
        created_at: Utc::now(),
        titles: titles.iter().filter_map(title_number).collect(),
        parts_total: attributions.len(),
        parts_resolved: attributions.len() - unresolved.len(),
        documents_attributed: listings.len(),
        unresolved: unresolved.clone(),
    };

    let staging = data.snapshot_staging_dir(date);
    atomic::remove_dir(&staging)?;
    atomic::write_json(&staging.join(STRUCTURE_FILE), &titles)?;
    atomic::write_json(&staging.join(ATTRIBUTION_FILE), &attributions)?;
    atomic::write_json(&staging.join(LISTINGS_FILE), &listings)?;
    atomic::write_json(&staging.join(MANIFEST_FILE), &manifest)?;
    atomic::replace_dir(&staging, &dir)?;

    if unresolved.is_empty() {
        tracing::info!(%date, documents = manifest.documents_attributed, "snapshot complete");
        Ok(manifest)
    } else {
        tracing::warn!(%date, unresolved = unresolved.len(), "snapshot persisted with unresolved parts");
        Err(SnapshotError::Incomplete { date, unresolved })
    }
}

/// What a stored snapshot for the date already holds
#[derive(Default)]
struct Previous {
    titles: Option<Vec<CodeNode>>,
    attributions: HashMap<PartRef, PartAttribution>,
    listings: IndexMap<DocumentId, RegisterListing>,
}

impl Previous {
    fn load(dir: &Path) -> Result<Self, SnapshotError> {
        let titles = atomic::read_json(&dir.join(STRUCTURE_FILE))?;
        let attributions: Vec<PartAttribution> =
            atomic::read_json(&dir.join(ATTRIBUTION_FILE))?.unwrap_or_default();
        Ok(Self {
            titles,
            attributions: attributions
                .into_iter()
                .map(|a| (a.part.clone(), a))
                .collect(),
            listings: atomic::read_json(&dir.join(LISTINGS_FILE))?.unwrap_or_default(),
        })
    }

    fn resolved(&self, part: &PartRef) -> Option<&PartAttribution> {
        self.attributions.get(part).filter(|a| a.resolved)
    }

    /// Reuse a stored attribution with the listings its edges point at
    fn carry(
        &self,
        attribution: &PartAttribution,
        word_count: u64,
    ) -> (PartAttribution, Vec<RegisterListing>) {
        let listings = attribution
            .edges
            .iter()
            .filter_map(|e| self.listings.get(&e.document).cloned())
            .collect();
        let mut attribution = attribution.clone();
        attribution.word_count = word_count;
        (attribution, listings)
    }
}

/// Non-reserved parts with their word counts, in document order
fn collect_parts(titles: &[CodeNode]) -> Vec<(PartRef, u64)> {
    let mut out = Vec::new();
    for title in titles {
        let Some(number) = title_number(title) else {
            tracing::warn!(identifier = %title.identifier, "skipping title with non-numeric identifier");
            continue;
        };
        if title.reserved {
            continue;
        }
        for node in title.parts() {
            if node.reserved {
                continue;
            }
            if let Some(part) = part_ref(number, node) {
                out.push((part, node.total_words()));
            }
        }
    }
    out
}

async fn resolve_part(
    provider: &dyn StructureProvider,
    date: SnapshotDate,
    part: PartRef,
    word_count: u64,
) -> (PartAttribution, Vec<RegisterListing>) {
    let register_part = part.register_part();
    let (sites, listings) = futures::join!(
        provider.part_citations(date, &part),
        provider.part_documents(date, part.title, &register_part),
    );
    match (sites, listings) {
        (Ok(sites), Ok(listings)) => {
            let attribution = attribute_part(date, part, word_count, &sites, &listings);
            (attribution, listings)
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(part = %part, error = %e, "part unresolved");
            (PartAttribution::unresolved(part, word_count, e.to_string()), Vec::new())
        }
    }
}

/// Match every citation in the part against the listings by page range
pub(crate) fn attribute_part(
    date: SnapshotDate,
    part: PartRef,
    word_count: u64,
    sites: &[crate::provider::CitationSite],
    listings: &[RegisterListing],
) -> PartAttribution {
    let mut by_citation: IndexMap<FrCitation, BTreeSet<Division>> = IndexMap::new();
    for site in sites {
        for cite in scan(&site.text) {
            by_citation
                .entry(cite)
                .or_default()
                .insert(site.division.clone());
        }
    }

    let mut edges: IndexMap<DocumentId, AttributionEdge> = IndexMap::new();
    let mut unattributed = Vec::new();
    for (cite, divisions) in &by_citation {
        let mut matched = false;
        for listing in listings.iter().filter(|l| cite.within(l)) {
            matched = true;
            let edge = edges
                .entry(listing.document_number.clone())
                .or_insert_with(|| AttributionEdge {
                    part: part.clone(),
                    document: listing.document_number.clone(),
                    observed_at: date,
                    publication_date: listing.publication_date,
                    citation: listing.citation.clone(),
                    start_page: listing.start_page,
                    divisions: Vec::new(),
                });
            for division in divisions {
                if !edge.divisions.contains(division) {
                    edge.divisions.push(division.clone());
                }
            }
        }
        if !matched {
            unattributed.push(cite.to_string());
        }
    }

    let mut edges: Vec<AttributionEdge> = edges.into_values().collect();
    edges.sort_by(AttributionEdge::sequence_cmp);
    for edge in &mut edges {
        edge.divisions.sort();
    }

    let mut documents_affecting: Vec<DocumentId> = Vec::new();
    for listing in listings {
        if !documents_affecting.contains(&listing.document_number) {
            documents_affecting.push(listing.document_number.clone());
        }
    }

    tracing::debug!(
        part = %part,
        citations = by_citation.len(),
        attributed = by_citation.len() - unattributed.len(),
        documents = edges.len(),
        "part attributed"
    );

    PartAttribution {
        part,
        word_count,
        resolved: true,
        error: None,
        citations: by_citation.keys().map(ToString::to_string).collect(),
        unattributed,
        documents_affecting,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CitationSite;
    use chrono::NaiveDate;

    fn listing(doc: &str, cite: &str, start: u32, end: u32, date: (i32, u32, u32)) -> RegisterListing {
        RegisterListing {
            document_number: DocumentId::parse(doc).unwrap(),
            citation: Some(cite.to_string()),
            start_page: Some(start),
            end_page: Some(end),
            publication_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            title: format!("Rule {doc}"),
            abstract_text: String::new(),
            agency_names: vec![],
            significant: false,
            cfr_references: vec![],
        }
    }

    fn site(name: &str, text: &str) -> CitationSite {
        CitationSite {
            division: Division::new(name, "SECTION"),
            text: text.to_string(),
        }
    }

    #[test]
    fn citations_attribute_by_page_range() {
        let date = "2024-12-30".parse().unwrap();
        let sites = vec![
            site("180.1", "[78 FR 1240, Jan. 8, 2013]"),
            site("180.3", "[77 FR 46290, Aug. 3, 2012, as amended at 78 FR 1236, Jan. 8, 2013]"),
            site("180.5", "[60 FR 100, Jan. 3, 1995]"),
        ];
        let listings = vec![
            listing("2013-00100", "78 FR 1234", 1234, 1250, (2013, 1, 8)),
            listing("2012-18900", "77 FR 46288", 46288, 46295, (2012, 8, 3)),
            listing("2014-00001", "79 FR 5", 5, 9, (2014, 1, 2)),
        ];
        let attribution = attribute_part(date, PartRef::new(40, "180"), 500, &sites, &listings);

        let docs: Vec<_> = attribution.edges.iter().map(|e| e.document.to_string()).collect();
        assert_eq!(docs, vec!["2012-18900", "2013-00100"]);
        assert_eq!(attribution.unattributed, vec!["60 FR 100"]);
        assert_eq!(attribution.citations.len(), 4);
        assert_eq!(attribution.documents_affecting.len(), 3);

        let later = &attribution.edges[1];
        let names: Vec<_> = later.divisions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["180.1", "180.3"]);
    }

    #[test]
    fn reserved_parts_are_not_collected() {
        use regscope_core::NodeKind;
        let titles = vec![CodeNode::branch(
            NodeKind::Title,
            "15",
            vec![
                CodeNode::leaf(NodeKind::Part, "4", 10),
                CodeNode::leaf(NodeKind::Part, "4a", 20),
                CodeNode::leaf(NodeKind::Part, "5", 0).reserved(),
            ],
        )];
        let parts = collect_parts(&titles);
        assert_eq!(
            parts,
            vec![(PartRef::new(15, "4"), 10), (PartRef::new(15, "4a"), 20)]
        );
    }
}
