//! Durable run state
//!
//! `state.json` is the single source of truth for which units of a run
//! still need work. It is rewritten atomically after every transition.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regscope_core::{DocumentId, PartRef, RunId, Scope, SnapshotDate};
use regscope_store::{atomic, DataDir};
use regscope_workspace::IngestStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InProgress,
    Done,
    Skipped,
    Failed,
}

impl UnitStatus {
    /// Whether a resume picks the unit up again
    #[inline]
    #[must_use]
    pub fn needs_work(self) -> bool {
        matches!(self, Self::Pending | Self::Skipped | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Parts of the scope that led to this document
    pub parts: Vec<PartRef>,
    /// Times the unit has been started
    #[serde(default)]
    pub attempts: u32,
}

impl UnitEntry {
    fn pending(parts: Vec<PartRef>) -> Self {
        Self {
            status: UnitStatus::Pending,
            reason: None,
            parts,
            attempts: 0,
        }
    }
}

/// Outcome record written by the worker that processed a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub document_id: DocumentId,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub attempt: u32,
    pub ingest: IngestStatus,
    pub config_version: String,
    pub finished_at: DateTime<Utc>,
}

/// Units counted by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn add(&mut self, status: UnitStatus) {
        self.total += 1;
        match status {
            UnitStatus::Pending => self.pending += 1,
            UnitStatus::InProgress => self.in_progress += 1,
            UnitStatus::Done => self.done += 1,
            UnitStatus::Skipped => self.skipped += 1,
            UnitStatus::Failed => self.failed += 1,
        }
    }

    /// Units a resume would pick up
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_progress + self.skipped + self.failed
    }
}

/// Overview of one run, as listed and as written to `summary.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub scope: Scope,
    pub snapshot_date: SnapshotDate,
    pub config_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub scope: Scope,
    pub snapshot_date: SnapshotDate,
    pub config_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// In run order
    pub units: IndexMap<DocumentId, UnitEntry>,
}

impl RunState {
    /// Fresh run with every unit pending
    #[must_use]
    pub fn new(
        run_id: RunId,
        scope: Scope,
        snapshot_date: SnapshotDate,
        config_version: impl Into<String>,
        units: IndexMap<DocumentId, Vec<PartRef>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            scope,
            snapshot_date,
            config_version: config_version.into(),
            created_at: now,
            updated_at: now,
            units: units
                .into_iter()
                .map(|(id, parts)| (id, UnitEntry::pending(parts)))
                .collect(),
        }
    }

    /// # Errors
    /// - [`PipelineError::UnknownRun`] if no state exists for `run_id`
    /// - [`PipelineError::Store`] if it is unreadable
    pub fn load(data: &DataDir, run_id: RunId) -> Result<Self, PipelineError> {
        atomic::read_json(&data.run_state(run_id))?.ok_or(PipelineError::UnknownRun(run_id))
    }

    /// # Errors
    /// [`PipelineError::Store`] if the write fails
    pub fn save(&self, data: &DataDir) -> Result<(), PipelineError> {
        atomic::write_json(&data.run_state(self.run_id), self)?;
        Ok(())
    }

    #[must_use]
    pub fn unit(&self, id: &DocumentId) -> Option<&UnitEntry> {
        self.units.get(id)
    }

    /// Units a resume would run, in run order
    #[must_use]
    pub fn outstanding(&self) -> Vec<DocumentId> {
        self.units
            .iter()
            .filter(|(_, u)| u.status.needs_work())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Return units interrupted mid-flight to pending; returns how many
    pub fn reset_in_progress(&mut self) -> usize {
        let mut reset = 0;
        for unit in self.units.values_mut() {
            if unit.status == UnitStatus::InProgress {
                unit.status = UnitStatus::Pending;
                unit.reason = None;
                reset += 1;
            }
        }
        reset
    }

    pub(crate) fn mark_started(&mut self, id: &DocumentId) {
        if let Some(unit) = self.units.get_mut(id) {
            unit.status = UnitStatus::InProgress;
            unit.reason = None;
            unit.attempts += 1;
        }
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_finished(&mut self, id: &DocumentId, status: UnitStatus, reason: Option<String>) {
        if let Some(unit) = self.units.get_mut(id) {
            unit.status = status;
            unit.reason = reason;
        }
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for unit in self.units.values() {
            counts.add(unit.status);
        }
        counts
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            scope: self.scope.clone(),
            snapshot_date: self.snapshot_date,
            config_version: self.config_version.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            counts: self.counts(),
        }
    }
}

/// Persisted state of a run
///
/// # Errors
/// [`PipelineError::UnknownRun`] or [`PipelineError::Store`]
pub fn load_state(data: &DataDir, run_id: RunId) -> Result<RunState, PipelineError> {
    RunState::load(data, run_id)
}

/// Summaries of every run under `data`, oldest first
///
/// # Errors
/// [`PipelineError::Store`] if a run directory or state is unreadable
pub fn list_runs(data: &DataDir) -> Result<Vec<RunSummary>, PipelineError> {
    let mut runs = Vec::new();
    for run_id in data.run_ids()? {
        match atomic::read_json::<RunState>(&data.run_state(run_id))? {
            Some(state) => runs.push(state.summary()),
            None => tracing::warn!(%run_id, "run directory without state, ignored"),
        }
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> DocumentId {
        DocumentId::parse(raw).unwrap()
    }

    fn state() -> RunState {
        let mut units = IndexMap::new();
        units.insert(id("2024-00003"), vec![PartRef::new(40, "180")]);
        units.insert(id("2024-00001"), vec![PartRef::new(40, "180")]);
        units.insert(id("2024-00002"), vec![PartRef::new(40, "182")]);
        RunState::new(
            RunId::new(),
            Scope::title(40),
            "2024-12-30".parse().unwrap(),
            "abc",
            units,
        )
    }

    #[test]
    fn transitions_and_counts() {
        let mut state = state();
        assert_eq!(state.counts().pending, 3);
        assert_eq!(
            state.outstanding(),
            vec![id("2024-00003"), id("2024-00001"), id("2024-00002")]
        );

        state.mark_started(&id("2024-00003"));
        state.mark_finished(&id("2024-00003"), UnitStatus::Done, None);
        state.mark_started(&id("2024-00001"));
        state.mark_finished(&id("2024-00001"), UnitStatus::Skipped, Some("register timeout".into()));
        state.mark_started(&id("2024-00002"));

        let counts = state.counts();
        assert_eq!((counts.done, counts.skipped, counts.in_progress), (1, 1, 1));
        assert_eq!(counts.outstanding(), 2);
        assert_eq!(state.unit(&id("2024-00001")).unwrap().attempts, 1);

        assert_eq!(state.reset_in_progress(), 1);
        assert_eq!(
            state.outstanding(),
            vec![id("2024-00001"), id("2024-00002")]
        );
    }

    #[test]
    fn state_survives_reload_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let state = state();
        state.save(&data).unwrap();

        let loaded = load_state(&data, state.run_id).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(list_runs(&data).unwrap().len(), 1);
        assert!(matches!(
            load_state(&data, RunId::new()),
            Err(PipelineError::UnknownRun(_))
        ));
    }
}
