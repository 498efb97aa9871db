use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use regscope_core::{CodeNode, PartRef, SnapshotDate};
use regscope_snapshot::{CitationSite, ProviderError, RegisterListing, StructureProvider};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Structure provider answering from fixed data
#[derive(Debug, Default)]
pub struct FakeStructureProvider {
    titles: Mutex<Vec<CodeNode>>,
    citations: Mutex<HashMap<String, Vec<CitationSite>>>,
    documents: Mutex<HashMap<(u16, String), Vec<RegisterListing>>>,
    /// Part key -> remaining failures
    failures: DashMap<String, usize>,
    title_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeStructureProvider {
    pub fn new(titles: Vec<CodeNode>) -> Self {
        Self {
            titles: Mutex::new(titles),
            ..Self::default()
        }
    }

    pub fn with_citations(self, part: &PartRef, sites: Vec<CitationSite>) -> Self {
        self.citations.lock().insert(part.key(), sites);
        self
    }

    /// Listings filed under the numeric `register_part` of `title`
    pub fn with_documents(self, title: u16, register_part: &str, listings: Vec<RegisterListing>) -> Self {
        self.documents
            .lock()
            .insert((title, register_part.to_string()), listings);
        self
    }

    /// Fail citation lookups for `part` the next `times` calls
    pub fn fail_part(&self, part: &PartRef, times: usize) {
        self.failures.insert(part.key(), times);
    }

    /// Fail the code tree fetch the next `times` calls
    pub fn fail_titles(&self, times: usize) {
        self.title_failures.store(times, Ordering::SeqCst);
    }

    pub fn set_titles(&self, titles: Vec<CodeNode>) {
        *self.titles.lock() = titles;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self, part: &PartRef) -> bool {
        match self.failures.get_mut(&part.key()) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl StructureProvider for FakeStructureProvider {
    async fn titles(&self, _date: SnapshotDate) -> Result<Vec<CodeNode>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .title_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProviderError::Transient("code tree: 503 from code source".to_string()));
        }
        Ok(self.titles.lock().clone())
    }

    async fn part_citations(
        &self,
        _date: SnapshotDate,
        part: &PartRef,
    ) -> Result<Vec<CitationSite>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure(part) {
            return Err(ProviderError::Transient(format!("{part}: 503 from code source")));
        }
        Ok(self
            .citations
            .lock()
            .get(&part.key())
            .cloned()
            .unwrap_or_default())
    }

    async fn part_documents(
        &self,
        _date: SnapshotDate,
        title: u16,
        register_part: &str,
    ) -> Result<Vec<RegisterListing>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .documents
            .lock()
            .get(&(title, register_part.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
