//! Run orchestration
//!
//! A run expands a scope against one snapshot into document units and
//! pushes each through ingest then analysis on a bounded worker pool.
//! State transitions go through a single writer so `state.json` always
//! reflects what has been recorded, and a resumed run only touches units
//! that are not `done`.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::export::{export, Export};
use crate::state::{RunState, RunSummary, UnitRecord, UnitStatus};
use crate::writer::{StateHandle, StateWriter};
use chrono::Utc;
use regscope_analysis::{
    AnalysisEngine, AnalyzeOptions, CallStats, RateLimitedCapability, RemoteCapability,
};
use regscope_core::{DocumentId, RunId, Scope, SnapshotDate};
use regscope_snapshot::Snapshot;
use regscope_store::{atomic, DataDir};
use regscope_workspace::{DocumentRegister, IngestOptions, IngestStatus, WorkspaceBuilder};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

const COVERAGE_FILE: &str = "coverage.json";

/// Stops a run from starting further units
///
/// Units already running complete and are recorded; units not yet started
/// stay `pending` for a later resume.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Outcome of `run` or `resume`
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    /// Units started during this call
    pub started: usize,
    pub cancelled: bool,
}

impl RunOutcome {
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.summary.run_id
    }
}

/// Everything a worker task needs, owned
#[derive(Clone)]
struct Worker {
    data: DataDir,
    run_id: RunId,
    workspace: Arc<WorkspaceBuilder>,
    engine: Arc<AnalysisEngine>,
    refresh: bool,
    state: StateHandle,
}

impl Worker {
    async fn process(self, id: DocumentId, attempt: u32) {
        self.state.started(&id).await;
        let (ingest, status, reason) = self.unit(&id).await;

        let record = UnitRecord {
            document_id: id.clone(),
            status,
            reason: reason.clone(),
            attempt,
            ingest,
            config_version: self.engine.version().to_string(),
            finished_at: Utc::now(),
        };
        if let Err(e) = atomic::write_json(&self.data.run_unit(self.run_id, &id), &record) {
            tracing::warn!(run_id = %self.run_id, document_id = %id, error = %e, "could not write unit record");
        }
        self.state.finished(&id, status, reason).await;
    }

    async fn unit(&self, id: &DocumentId) -> (IngestStatus, UnitStatus, Option<String>) {
        let options = IngestOptions {
            refresh: self.refresh,
            ..IngestOptions::default()
        };
        let ingest = self.workspace.ingest_one(id, options).await;
        match &ingest {
            IngestStatus::Skipped { reason } => {
                let reason = Some(reason.clone());
                return (ingest, UnitStatus::Skipped, reason);
            }
            IngestStatus::Failed { reason } => {
                let reason = Some(reason.clone());
                return (ingest, UnitStatus::Failed, reason);
            }
            _ => {}
        }
        match self.engine.analyze(id, AnalyzeOptions::default()).await {
            Ok(_) => (ingest, UnitStatus::Done, None),
            Err(e) => (ingest, UnitStatus::Failed, Some(e.to_string())),
        }
    }
}

/// Drives runs against one snapshot, register and capability
pub struct Orchestrator {
    data: DataDir,
    snapshot: Arc<Snapshot>,
    workspace: Arc<WorkspaceBuilder>,
    engine: Arc<AnalysisEngine>,
    stats: Arc<CallStats>,
    config: PipelineConfig,
    cancel: CancelHandle,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("data", &self.data)
            .field("snapshot", &self.snapshot.date())
            .field("config_version", &self.engine.version())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wire the components; every remote call goes through one rate
    /// limiter sized by `config.rate_tier`
    ///
    /// # Errors
    /// [`PipelineError::Configuration`] if `config` is invalid
    pub fn new(
        data: DataDir,
        snapshot: Arc<Snapshot>,
        register: Arc<dyn DocumentRegister>,
        capability: Arc<dyn RemoteCapability>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let limited = RateLimitedCapability::new(capability, config.rate_tier.limit());
        let stats = limited.stats();
        let workspace = Arc::new(WorkspaceBuilder::new(data.clone(), register));
        let engine = AnalysisEngine::new(
            data.clone(),
            workspace.clone(),
            Arc::new(limited),
            config.analysis.clone(),
        )?;
        Ok(Self {
            data,
            snapshot,
            workspace,
            engine: Arc::new(engine),
            stats,
            config,
            cancel: CancelHandle::new(),
        })
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Remote calls made through this orchestrator
    #[must_use]
    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    #[must_use]
    pub fn config_version(&self) -> &str {
        self.engine.version()
    }

    /// Start a new run over `scope`
    ///
    /// Configuration and scope are validated before any unit runs.
    ///
    /// # Errors
    /// - [`PipelineError::Configuration`] for an invalid scope
    /// - [`PipelineError::Store`] if run state cannot be written
    pub async fn run(&self, scope: Scope) -> Result<RunOutcome, PipelineError> {
        self.config.validate()?;
        let parts = self.snapshot.expand_scope(&scope)?;
        if !self.snapshot.manifest().is_complete() {
            tracing::warn!(
                snapshot = %self.snapshot.date(),
                unresolved = self.snapshot.manifest().unresolved.len(),
                "running against an incomplete snapshot"
            );
        }
        let coverage = self.snapshot.coverage_report(&scope)?;
        let units = self.snapshot.documents_for(&parts);

        let run_id = RunId::new();
        atomic::write_json(&self.data.run_dir(run_id).join(COVERAGE_FILE), &coverage)?;
        let state = RunState::new(
            run_id,
            scope,
            self.snapshot.date(),
            self.engine.version(),
            units,
        );
        state.save(&self.data)?;
        tracing::info!(
            %run_id,
            scope = %state.scope,
            snapshot = %state.snapshot_date,
            parts = parts.len(),
            units = state.units.len(),
            "run started"
        );
        self.execute(state).await
    }

    /// Continue a run from its persisted state
    ///
    /// Units left `in_progress` by an interrupted process return to
    /// `pending`; every pending, skipped and failed unit runs again and
    /// `done` units are left alone.
    ///
    /// # Errors
    /// - [`PipelineError::UnknownRun`] if no such run exists
    /// - [`PipelineError::Configuration`] if the run was made under a
    ///   different analysis configuration
    /// - [`PipelineError::Snapshot`] if the run's snapshot is gone
    pub async fn resume(&self, run_id: RunId) -> Result<RunOutcome, PipelineError> {
        let mut state = RunState::load(&self.data, run_id)?;
        if state.config_version != self.engine.version() {
            return Err(PipelineError::Configuration(format!(
                "run {run_id} used analysis configuration {}, this pipeline uses {}",
                state.config_version,
                self.engine.version()
            )));
        }
        self.snapshot_for(state.snapshot_date)?;

        let reset = state.reset_in_progress();
        if reset > 0 {
            state.save(&self.data)?;
        }
        tracing::info!(
            %run_id,
            reset,
            outstanding = state.outstanding().len(),
            "run resumed"
        );
        self.execute(state).await
    }

    /// Export `run_id` to `export.jsonl` and `summary.json`
    ///
    /// # Errors
    /// See [`export`]
    pub fn export(&self, run_id: RunId) -> Result<Export, PipelineError> {
        export(&self.data, run_id)
    }

    fn snapshot_for(&self, date: SnapshotDate) -> Result<Arc<Snapshot>, PipelineError> {
        if date == self.snapshot.date() {
            Ok(self.snapshot.clone())
        } else {
            Ok(Arc::new(Snapshot::open(&self.data, date)?))
        }
    }

    async fn execute(&self, state: RunState) -> Result<RunOutcome, PipelineError> {
        let run_id = state.run_id;
        let work: Vec<(DocumentId, u32)> = state
            .outstanding()
            .into_iter()
            .map(|id| {
                let attempt = state.unit(&id).map_or(0, |u| u.attempts) + 1;
                (id, attempt)
            })
            .collect();

        let writer = StateWriter::spawn(self.data.clone(), state);
        let worker = Worker {
            data: self.data.clone(),
            run_id,
            workspace: self.workspace.clone(),
            engine: self.engine.clone(),
            refresh: self.config.ingest_refresh,
            state: writer.handle(),
        };
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut cancelled = self.cancel.subscribe();
        let mut tasks = JoinSet::new();
        let mut started = 0;

        for (id, attempt) in work {
            if self.cancel.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = cancelled.wait_for(|c| *c) => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let worker = worker.clone();
            started += 1;
            tasks.spawn(async move {
                worker.process(id, attempt).await;
                drop(permit);
            });
        }
        drop(worker);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(%run_id, error = %e, "unit task aborted");
            }
        }

        let state = writer.finish().await?;
        let summary = state.summary();
        let cancelled = self.cancel.is_cancelled();
        tracing::info!(
            %run_id,
            started,
            done = summary.counts.done,
            skipped = summary.counts.skipped,
            failed = summary.counts.failed,
            pending = summary.counts.pending,
            cancelled,
            "run finished"
        );
        Ok(RunOutcome {
            summary,
            started,
            cancelled,
        })
    }
}
