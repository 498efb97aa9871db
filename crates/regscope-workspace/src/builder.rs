//! Workspace builder
//!
//! Resolves register listings into per-document workspaces. Each
//! workspace is written text first and details last, both atomically, so
//! a `details.toml` on disk always describes a complete text.

use crate::document::SourceDocument;
use crate::error::{RegisterError, WorkspaceError};
use crate::register::{AgencyInfo, DocumentRegister};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use regscope_core::{ContentHash, DocumentId};
use regscope_snapshot::RegisterListing;
use regscope_store::{atomic, DataDir, RecordCache};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Options for [`WorkspaceBuilder::ingest`]
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Re-fetch documents that already have a workspace
    pub refresh: bool,
    pub concurrency: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            refresh: false,
            concurrency: 4,
        }
    }
}

/// What happened to one listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    Created,
    Unchanged,
    Replaced,
    /// Transient failure; retrying later may succeed
    Skipped { reason: String },
    /// Permanent failure
    Failed { reason: String },
}

impl IngestStatus {
    /// True when a usable workspace exists afterwards
    #[inline]
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Created | Self::Unchanged | Self::Replaced)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestEntry {
    pub id: DocumentId,
    #[serde(flatten)]
    pub status: IngestStatus,
}

/// Per-listing outcomes, in first-occurrence order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub entries: Vec<IngestEntry>,
}

impl IngestReport {
    #[must_use]
    pub fn status(&self, id: &DocumentId) -> Option<&IngestStatus> {
        self.entries.iter().find(|e| &e.id == id).map(|e| &e.status)
    }

    /// Entries matching `predicate`
    pub fn count(&self, predicate: impl Fn(&IngestStatus) -> bool) -> usize {
        self.entries.iter().filter(|e| predicate(&e.status)).count()
    }

    /// Documents worth retrying on a later attempt
    #[must_use]
    pub fn skipped(&self) -> Vec<&DocumentId> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, IngestStatus::Skipped { .. }))
            .map(|e| &e.id)
            .collect()
    }

    #[must_use]
    pub fn failed(&self) -> Vec<&DocumentId> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, IngestStatus::Failed { .. }))
            .map(|e| &e.id)
            .collect()
    }

    /// Listings whose ingest was skipped, for a later retry
    #[must_use]
    pub fn retry_listings<'a>(&self, listings: &'a [RegisterListing]) -> Vec<&'a RegisterListing> {
        let skipped = self.skipped();
        listings
            .iter()
            .filter(|l| skipped.contains(&&l.document_number))
            .collect()
    }
}

/// Builds and reads document workspaces
pub struct WorkspaceBuilder {
    data: DataDir,
    register: Arc<dyn DocumentRegister>,
    agencies: OnceCell<Arc<Vec<AgencyInfo>>>,
    documents: RecordCache<DocumentId, SourceDocument>,
}

impl std::fmt::Debug for WorkspaceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceBuilder")
            .field("data", &self.data)
            .field("documents", &self.documents)
            .finish_non_exhaustive()
    }
}

impl WorkspaceBuilder {
    #[must_use]
    pub fn new(data: DataDir, register: Arc<dyn DocumentRegister>) -> Self {
        Self {
            data,
            register,
            agencies: OnceCell::new(),
            documents: RecordCache::default(),
        }
    }

    /// Ingest a batch of listings
    ///
    /// Duplicate document ids are processed once. Failures are reported
    /// per listing and never abort the batch.
    pub async fn ingest(&self, listings: &[RegisterListing], options: IngestOptions) -> IngestReport {
        let mut seen = HashSet::new();
        let unique: Vec<&RegisterListing> = listings
            .iter()
            .filter(|l| seen.insert(l.document_number.clone()))
            .collect();

        let entries: Vec<IngestEntry> = stream::iter(unique)
            .map(|listing| async move {
                let status = self.ingest_one(&listing.document_number, options).await;
                IngestEntry {
                    id: listing.document_number.clone(),
                    status,
                }
            })
            .buffered(options.concurrency.max(1))
            .collect()
            .await;

        let report = IngestReport { entries };
        tracing::info!(
            listings = listings.len(),
            created = report.count(|s| matches!(s, IngestStatus::Created)),
            replaced = report.count(|s| matches!(s, IngestStatus::Replaced)),
            unchanged = report.count(|s| matches!(s, IngestStatus::Unchanged)),
            skipped = report.count(|s| matches!(s, IngestStatus::Skipped { .. })),
            failed = report.count(|s| matches!(s, IngestStatus::Failed { .. })),
            "ingest finished"
        );
        report
    }

    /// Ingest one document
    pub async fn ingest_one(&self, id: &DocumentId, options: IngestOptions) -> IngestStatus {
        match self.try_ingest(id, options).await {
            Ok(status) => status,
            Err(WorkspaceError::Register(e)) if e.is_transient() => {
                tracing::warn!(document = %id, error = %e, "ingest skipped");
                IngestStatus::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(document = %id, error = %e, "ingest failed");
                IngestStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_ingest(
        &self,
        id: &DocumentId,
        options: IngestOptions,
    ) -> Result<IngestStatus, WorkspaceError> {
        let existing = self.read_details(id)?;
        if existing.is_some() && !options.refresh {
            return Ok(IngestStatus::Unchanged);
        }

        let fetched = self.register.fetch(id).await?;
        if &fetched.metadata.document_number != id {
            return Err(RegisterError::Permanent(format!(
                "register answered {} for {id}",
                fetched.metadata.document_number
            ))
            .into());
        }
        let agencies = self.agency_directory().await?;
        let document = SourceDocument::from_register(&fetched, &agencies, Utc::now());

        if let Some(existing) = &existing {
            if existing.same_content(&document) {
                tracing::debug!(document = %id, "workspace unchanged");
                return Ok(IngestStatus::Unchanged);
            }
        }

        atomic::write_bytes(&self.data.document_text(id), fetched.full_text.as_bytes())?;
        atomic::write_toml(&self.data.document_details(id), &document)?;
        self.documents.invalidate(id).await;

        if existing.is_some() {
            tracing::info!(document = %id, "workspace replaced");
            Ok(IngestStatus::Replaced)
        } else {
            tracing::debug!(document = %id, words = document.word_count, "workspace created");
            Ok(IngestStatus::Created)
        }
    }

    async fn agency_directory(&self) -> Result<Arc<Vec<AgencyInfo>>, RegisterError> {
        self.agencies
            .get_or_try_init(|| async { self.register.agencies().await.map(Arc::new) })
            .await
            .cloned()
    }

    fn read_details(&self, id: &DocumentId) -> Result<Option<SourceDocument>, WorkspaceError> {
        Ok(atomic::read_toml(&self.data.document_details(id))?)
    }

    /// Whether a workspace exists for `id`
    #[must_use]
    pub fn exists(&self, id: &DocumentId) -> bool {
        self.data.document_details(id).is_file()
    }

    /// Details of an ingested document
    ///
    /// # Errors
    /// [`WorkspaceError::NotIngested`] if no workspace exists
    pub async fn load(&self, id: &DocumentId) -> Result<Arc<SourceDocument>, WorkspaceError> {
        self.documents
            .try_get_or_insert_with(id.clone(), || async {
                self.read_details(id)?
                    .ok_or_else(|| WorkspaceError::NotIngested(id.clone()))
            })
            .await
    }

    /// Full text of an ingested document, verified against its hash
    ///
    /// # Errors
    /// [`WorkspaceError::Corrupt`] if the text is missing or altered
    pub async fn full_text(&self, id: &DocumentId) -> Result<String, WorkspaceError> {
        let document = self.load(id).await?;
        let bytes = atomic::read_bytes(&self.data.document_text(id))?.ok_or_else(|| {
            WorkspaceError::Corrupt {
                id: id.clone(),
                reason: "full text missing".to_string(),
            }
        })?;
        if ContentHash::compute(&bytes) != document.content_hash {
            return Err(WorkspaceError::Corrupt {
                id: id.clone(),
                reason: "full text does not match content hash".to_string(),
            });
        }
        String::from_utf8(bytes).map_err(|e| WorkspaceError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })
    }

    #[inline]
    #[must_use]
    pub fn data(&self) -> &DataDir {
        &self.data
    }
}
