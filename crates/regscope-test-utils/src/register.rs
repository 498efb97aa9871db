use async_trait::async_trait;
use dashmap::DashMap;
use regscope_core::DocumentId;
use regscope_snapshot::RegisterListing;
use regscope_workspace::{AgencyInfo, DocumentRegister, RegisterDocument, RegisterError};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Document register answering from an in-memory table
#[derive(Debug, Default)]
pub struct FakeRegister {
    documents: DashMap<DocumentId, RegisterDocument>,
    agencies: Vec<AgencyInfo>,
    /// Id -> remaining transient failures
    transient: DashMap<DocumentId, usize>,
    permanent: DashMap<DocumentId, String>,
    fetches: DashMap<DocumentId, usize>,
    directory_calls: AtomicUsize,
}

impl FakeRegister {
    pub fn new(agencies: Vec<AgencyInfo>) -> Self {
        Self {
            agencies,
            ..Self::default()
        }
    }

    pub fn with_document(self, metadata: RegisterListing, full_text: impl Into<String>) -> Self {
        self.put(metadata, full_text);
        self
    }

    /// Add or replace a document
    pub fn put(&self, metadata: RegisterListing, full_text: impl Into<String>) {
        self.documents.insert(
            metadata.document_number.clone(),
            RegisterDocument {
                metadata,
                full_text: full_text.into(),
            },
        );
    }

    /// Fail the next `times` fetches of `id` with a transient error
    pub fn fail_transient(&self, id: &DocumentId, times: usize) {
        self.transient.insert(id.clone(), times);
    }

    pub fn fail_permanent(&self, id: &DocumentId, reason: &str) {
        self.permanent.insert(id.clone(), reason.to_string());
    }

    pub fn fetches(&self, id: &DocumentId) -> usize {
        self.fetches.get(id).map_or(0, |c| *c)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.iter().map(|e| *e.value()).sum()
    }

    pub fn directory_calls(&self) -> usize {
        self.directory_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentRegister for FakeRegister {
    async fn fetch(&self, id: &DocumentId) -> Result<RegisterDocument, RegisterError> {
        *self.fetches.entry(id.clone()).or_insert(0) += 1;
        if let Some(mut remaining) = self.transient.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RegisterError::Transient(format!("{id}: 503 from register")));
            }
        }
        if let Some(reason) = self.permanent.get(id) {
            return Err(RegisterError::Permanent(reason.clone()));
        }
        self.documents
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| RegisterError::NotFound(id.clone()))
    }

    async fn agencies(&self) -> Result<Vec<AgencyInfo>, RegisterError> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.agencies.clone())
    }
}
