//! Read side of a captured snapshot
//!
//! A [`Snapshot`] is loaded for an explicit date and is immutable; every
//! query is answered against that date only.

use crate::build::{ATTRIBUTION_FILE, LISTINGS_FILE, MANIFEST_FILE, STRUCTURE_FILE};
use crate::error::SnapshotError;
use crate::model::{AttributionEdge, CoverageReport, Manifest, PartAttribution, PartCoverage};
use crate::provider::RegisterListing;
use indexmap::IndexMap;
use radix_trie::{Trie, TrieCommon};
use regscope_core::{
    part_ref, path_key, title_number, CodeNode, DocumentId, NodeKind, PartRef, Scope,
    SnapshotDate,
};
use regscope_store::{atomic, DataDir};
use std::collections::HashMap;

/// A loaded structure snapshot
pub struct Snapshot {
    manifest: Manifest,
    titles: Vec<CodeNode>,
    /// Keyed by [`PartRef::key`], in document order
    parts: IndexMap<String, PartAttribution>,
    listings: IndexMap<DocumentId, RegisterListing>,
    by_document: HashMap<DocumentId, Vec<PartRef>>,
    /// Node path key -> position in `parts`, for prefix expansion
    index: Trie<String, usize>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("date", &self.manifest.date)
            .field("parts", &self.parts.len())
            .field("documents", &self.listings.len())
            .finish_non_exhaustive()
    }
}

impl Snapshot {
    /// Load the snapshot captured for `date`
    ///
    /// # Errors
    /// [`SnapshotError::NotFound`] if no manifest exists for the date
    pub fn open(data: &DataDir, date: SnapshotDate) -> Result<Self, SnapshotError> {
        let dir = data.snapshot_dir(date);
        let manifest: Manifest =
            atomic::read_json(&dir.join(MANIFEST_FILE))?.ok_or(SnapshotError::NotFound(date))?;
        let titles: Vec<CodeNode> =
            atomic::read_json(&dir.join(STRUCTURE_FILE))?.ok_or(SnapshotError::NotFound(date))?;
        let attributions: Vec<PartAttribution> = atomic::read_json(&dir.join(ATTRIBUTION_FILE))?
            .ok_or(SnapshotError::NotFound(date))?;
        let listings: IndexMap<DocumentId, RegisterListing> =
            atomic::read_json(&dir.join(LISTINGS_FILE))?.unwrap_or_default();
        Ok(Self::assemble(manifest, titles, attributions, listings))
    }

    /// Load the most recent snapshot with a manifest
    ///
    /// # Errors
    /// [`SnapshotError::NoSnapshots`] if none has been captured
    pub fn latest(data: &DataDir) -> Result<Self, SnapshotError> {
        for date in data.snapshot_dates()?.into_iter().rev() {
            match Self::open(data, date) {
                Ok(snapshot) => return Ok(snapshot),
                Err(SnapshotError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(SnapshotError::NoSnapshots)
    }

    /// Manifests of every captured snapshot, oldest first
    ///
    /// # Errors
    /// Returns [`SnapshotError::Store`] on unreadable records
    pub fn list(data: &DataDir) -> Result<Vec<Manifest>, SnapshotError> {
        let mut out = Vec::new();
        for date in data.snapshot_dates()? {
            if let Some(m) = atomic::read_json(&data.snapshot_dir(date).join(MANIFEST_FILE))? {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn assemble(
        manifest: Manifest,
        titles: Vec<CodeNode>,
        attributions: Vec<PartAttribution>,
        listings: IndexMap<DocumentId, RegisterListing>,
    ) -> Self {
        let parts: IndexMap<String, PartAttribution> = attributions
            .into_iter()
            .map(|a| (a.part.key(), a))
            .collect();

        let mut by_document: HashMap<DocumentId, Vec<PartRef>> = HashMap::new();
        for attribution in parts.values() {
            for edge in &attribution.edges {
                let entry = by_document.entry(edge.document.clone()).or_default();
                if !entry.contains(&edge.part) {
                    entry.push(edge.part.clone());
                }
            }
        }

        let mut index = Trie::new();
        for title in &titles {
            let Some(number) = title_number(title) else {
                continue;
            };
            title.walk(&mut |ancestors, node| {
                if node.kind != NodeKind::Part || node.reserved {
                    return;
                }
                let position = part_ref(number, node).and_then(|p| parts.get_index_of(&p.key()));
                if let Some(position) = position {
                    index.insert(path_key(ancestors, node), position);
                }
            });
        }

        Self {
            manifest,
            titles,
            parts,
            listings,
            by_document,
            index,
        }
    }

    #[inline]
    #[must_use]
    pub fn date(&self) -> SnapshotDate {
        self.manifest.date
    }

    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[inline]
    #[must_use]
    pub fn titles(&self) -> &[CodeNode] {
        &self.titles
    }

    /// Attribution record of one part
    #[must_use]
    pub fn part(&self, part: &PartRef) -> Option<&PartAttribution> {
        self.parts.get(&part.key())
    }

    /// Edges of a part, oldest first
    ///
    /// # Errors
    /// [`SnapshotError::UnknownPart`] if the part is not in the snapshot
    pub fn edges(&self, part: &PartRef) -> Result<&[AttributionEdge], SnapshotError> {
        self.part(part)
            .map(|a| a.edges.as_slice())
            .ok_or_else(|| SnapshotError::UnknownPart(part.clone()))
    }

    /// Documents that modified a part, in legislative order
    ///
    /// # Errors
    /// [`SnapshotError::UnknownPart`] if the part is not in the snapshot
    pub fn attribute(&self, part: &PartRef) -> Result<Vec<DocumentId>, SnapshotError> {
        Ok(self
            .edges(part)?
            .iter()
            .map(|e| e.document.clone())
            .collect())
    }

    /// Parts a document is attributed to
    #[must_use]
    pub fn parts_for_document(&self, id: &DocumentId) -> &[PartRef] {
        self.by_document
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Register listing of an attributed document
    #[must_use]
    pub fn listing(&self, id: &DocumentId) -> Option<&RegisterListing> {
        self.listings.get(id)
    }

    /// Word count of a part
    #[must_use]
    pub fn part_word_count(&self, part: &PartRef) -> Option<u64> {
        self.part(part).map(|a| a.word_count)
    }

    /// Total words over every part the document touched
    #[must_use]
    pub fn affected_word_count(&self, id: &DocumentId) -> u64 {
        self.parts_for_document(id)
            .iter()
            .filter_map(|p| self.part_word_count(p))
            .sum()
    }

    /// Documents reachable from `parts`, de-duplicated, first occurrence
    /// order, each with the parts that led to it
    #[must_use]
    pub fn documents_for(&self, parts: &[PartRef]) -> IndexMap<DocumentId, Vec<PartRef>> {
        let mut out: IndexMap<DocumentId, Vec<PartRef>> = IndexMap::new();
        for part in parts {
            let Some(attribution) = self.part(part) else {
                continue;
            };
            for edge in &attribution.edges {
                let entry = out.entry(edge.document.clone()).or_default();
                if !entry.contains(part) {
                    entry.push(part.clone());
                }
            }
        }
        out
    }

    /// Expand a scope to its non-reserved parts, in document order
    ///
    /// # Errors
    /// [`SnapshotError::Configuration`] if the scope is invalid or names
    /// nothing analyzable in this snapshot
    pub fn expand_scope(&self, scope: &Scope) -> Result<Vec<PartRef>, SnapshotError> {
        scope
            .validate()
            .map_err(|e| SnapshotError::Configuration(e.to_string()))?;

        let parts = match scope {
            Scope::All => self.parts.values().map(|a| a.part.clone()).collect(),
            Scope::Title { title } => {
                let node = self.title_node(*title)?;
                self.parts_under(&format!("title-{}/", node.identifier))
            }
            Scope::Part { part } => {
                let node = self
                    .title_node(part.title)?
                    .find(NodeKind::Part, &part.part)
                    .ok_or_else(|| SnapshotError::Configuration(format!("unknown part {part}")))?;
                if node.reserved {
                    return Err(SnapshotError::Configuration(format!("{part} is reserved")));
                }
                vec![part.clone()]
            }
            Scope::Division {
                title,
                division,
                identifier,
            } => {
                let root = self.title_node(*title)?;
                let prefix = find_path_key(root, *division, identifier).ok_or_else(|| {
                    SnapshotError::Configuration(format!(
                        "unknown {division} {identifier} in title {title}"
                    ))
                })?;
                self.parts_under(&prefix)
            }
        };

        if parts.is_empty() {
            return Err(SnapshotError::Configuration(format!(
                "{scope} contains no parts that are not reserved"
            )));
        }
        Ok(parts)
    }

    /// Coverage of attribution over a scope
    ///
    /// # Errors
    /// As [`Snapshot::expand_scope`]
    pub fn coverage_report(&self, scope: &Scope) -> Result<CoverageReport, SnapshotError> {
        let parts = self.expand_scope(scope)?;
        let mut entries = Vec::with_capacity(parts.len());
        let mut unresolved = Vec::new();
        for part in &parts {
            let Some(a) = self.part(part) else {
                continue;
            };
            if !a.resolved {
                unresolved.push(part.clone());
            }
            entries.push(PartCoverage {
                part: part.clone(),
                resolved: a.resolved,
                word_count: a.word_count,
                citations: a.citations.len(),
                citations_attributed: a.citations.len() - a.unattributed.len(),
                unattributed: a.unattributed.clone(),
                documents_affecting: a.documents_affecting.len(),
                documents_attributed: a.edges.len(),
            });
        }
        Ok(CoverageReport {
            snapshot: self.date(),
            scope: scope.to_string(),
            covered: entries.len() - unresolved.len(),
            total: entries.len(),
            unresolved,
            total_word_count: entries.iter().map(|e| e.word_count).sum(),
            parts: entries,
        })
    }

    fn title_node(&self, title: u16) -> Result<&CodeNode, SnapshotError> {
        self.titles
            .iter()
            .find(|t| title_number(t) == Some(title))
            .ok_or_else(|| {
                SnapshotError::Configuration(format!("title {title} not in snapshot {}", self.date()))
            })
    }

    fn parts_under(&self, prefix: &str) -> Vec<PartRef> {
        let Some(subtrie) = self.index.get_raw_descendant(prefix) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = subtrie
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, position)| *position)
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions
            .into_iter()
            .filter_map(|i| self.parts.get_index(i).map(|(_, a)| a.part.clone()))
            .collect()
    }
}

/// Path key of the first node of `kind` named `identifier`
fn find_path_key(root: &CodeNode, kind: NodeKind, identifier: &str) -> Option<String> {
    let mut found = None;
    root.walk(&mut |ancestors, node| {
        if found.is_none() && node.kind == kind && node.identifier == identifier {
            found = Some(path_key(ancestors, node));
        }
    });
    found
}
