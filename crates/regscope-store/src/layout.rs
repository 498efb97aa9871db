//! Data directory layout
//!
//! ```text
//! <root>/snapshots/<date>/{structure,attribution,listings,manifest}.json
//! <root>/documents/<doc-id>/{details.toml,full_text.txt}
//! <root>/cache/chunks/<key>.json
//! <root>/cache/embeddings/<model>/<shard>/<hash>.f32
//! <root>/analysis/<config-version>/<doc-id>/{retrieval.json,result.json,log.jsonl}
//! <root>/runs/<run-id>/{state.json,coverage.json,summary.json,export.jsonl,units/}
//! ```

use crate::error::StoreError;
use regscope_core::{ContentHash, DocumentId, RunId, SnapshotDate};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Root of all persisted pipeline state
///
/// Components receive a `DataDir` explicitly; there is no ambient
/// "current" directory or snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Use `root` as the data directory
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root path
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one structure snapshot
    #[must_use]
    pub fn snapshot_dir(&self, date: SnapshotDate) -> PathBuf {
        self.root.join("snapshots").join(date.to_string())
    }

    /// Directory a snapshot is captured into before it replaces
    /// [`snapshot_dir`](Self::snapshot_dir)
    #[must_use]
    pub fn snapshot_staging_dir(&self, date: SnapshotDate) -> PathBuf {
        self.root.join("snapshots").join(format!(".{date}.staging"))
    }

    /// Workspace directory of one document
    #[must_use]
    pub fn document_dir(&self, id: &DocumentId) -> PathBuf {
        self.root.join("documents").join(id.as_str())
    }

    #[must_use]
    pub fn document_details(&self, id: &DocumentId) -> PathBuf {
        self.document_dir(id).join("details.toml")
    }

    #[must_use]
    pub fn document_text(&self, id: &DocumentId) -> PathBuf {
        self.document_dir(id).join("full_text.txt")
    }

    /// Persisted chunk boundaries for a chunking key
    #[must_use]
    pub fn chunk_index(&self, key: &ContentHash) -> PathBuf {
        self.root
            .join("cache")
            .join("chunks")
            .join(format!("{key}.json"))
    }

    /// One embedding vector, sharded by the first hash byte
    #[must_use]
    pub fn embedding(&self, model: &str, key: &ContentHash) -> PathBuf {
        self.root
            .join("cache")
            .join("embeddings")
            .join(sanitize_segment(model))
            .join(key.shard())
            .join(format!("{key}.f32"))
    }

    /// Analysis artifacts for one `(configuration version, document)`
    #[must_use]
    pub fn analysis_dir(&self, config_version: &str, id: &DocumentId) -> PathBuf {
        self.root
            .join("analysis")
            .join(sanitize_segment(config_version))
            .join(id.as_str())
    }

    /// Directory of one run
    #[must_use]
    pub fn run_dir(&self, run: RunId) -> PathBuf {
        self.root.join("runs").join(run.to_string())
    }

    #[must_use]
    pub fn run_state(&self, run: RunId) -> PathBuf {
        self.run_dir(run).join("state.json")
    }

    /// Per-unit outcome record of a run
    #[must_use]
    pub fn run_unit(&self, run: RunId, id: &DocumentId) -> PathBuf {
        self.run_dir(run)
            .join("units")
            .join(format!("{}.json", id.as_str()))
    }

    /// Snapshot dates present on disk, ascending
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the snapshots directory is unreadable
    pub fn snapshot_dates(&self) -> Result<Vec<SnapshotDate>, StoreError> {
        let mut dates: Vec<SnapshotDate> = list_dir_names(&self.root.join("snapshots"))?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        dates.sort();
        Ok(dates)
    }

    /// Run ids present on disk, oldest first
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the runs directory is unreadable
    pub fn run_ids(&self) -> Result<Vec<RunId>, StoreError> {
        let mut runs: Vec<RunId> = list_dir_names(&self.root.join("runs"))?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        runs.sort();
        Ok(runs)
    }
}

/// Names of subdirectories, empty if `dir` does not exist
fn list_dir_names(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// Map a free-form label (model name, version) to one path segment
fn sanitize_segment(value: &str) -> String {
    let out: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with('.') {
        format!("_{out}")
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_under_root() {
        let data = DataDir::new("/data");
        let id = DocumentId::parse("2024-00001").unwrap();
        let date: SnapshotDate = "2024-12-30".parse().unwrap();
        assert_eq!(
            data.snapshot_dir(date),
            PathBuf::from("/data/snapshots/2024-12-30")
        );
        assert_eq!(
            data.document_details(&id),
            PathBuf::from("/data/documents/2024-00001/details.toml")
        );
        assert_eq!(
            data.analysis_dir("ab12", &id),
            PathBuf::from("/data/analysis/ab12/2024-00001")
        );
    }

    #[test]
    fn embedding_paths_are_sharded_and_sanitized() {
        let data = DataDir::new("/data");
        let key = ContentHash::compute(b"chunk");
        let path = data.embedding("embed/english v3", &key);
        let text = path.to_string_lossy();
        assert!(text.contains("embed_english_v3"));
        assert!(text.contains(&format!("/{}/", key.shard())));
        assert!(text.ends_with(".f32"));
    }

    #[test]
    fn listings_are_sorted_and_tolerate_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        assert!(data.snapshot_dates().unwrap().is_empty());
        assert!(data.run_ids().unwrap().is_empty());

        for d in ["2025-01-15", "2024-12-30", "not-a-date"] {
            fs::create_dir_all(dir.path().join("snapshots").join(d)).unwrap();
        }
        let dates: Vec<String> = data
            .snapshot_dates()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(dates, vec!["2024-12-30", "2025-01-15"]);
    }

    #[test]
    fn sanitize_blocks_traversal() {
        assert_eq!(sanitize_segment(".."), "_..");
        assert_eq!(sanitize_segment(""), "_");
    }
}
