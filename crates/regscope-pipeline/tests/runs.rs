//! End-to-end runs over a captured snapshot with in-memory collaborators

use async_trait::async_trait;
use regscope_analysis::{
    AnalysisConfig, CapabilityError, DataQualityFlag, EmbedKind, Operation, RemoteCapability,
    RerankHit, RetryPolicy,
};
use regscope_core::{PartRef, RunId, Scope};
use regscope_pipeline::{
    list_runs, load_state, CancelHandle, Orchestrator, PipelineConfig, PipelineError, RateTier,
    RunState, UnitRecord, UnitStatus,
};
use regscope_snapshot::{build, BuildOptions, Snapshot};
use regscope_store::{atomic, DataDir};
use regscope_test_utils::{
    challenged_rule_text, chapter, doc_id, epa, listing, part, routine_rule_text, site,
    snapshot_date, title, FakeCapability, FakeRegister, FakeStructureProvider,
};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;

const SNAPSHOT: &str = "2024-12-30";

struct Fixture {
    _dir: TempDir,
    data: DataDir,
    snapshot: Arc<Snapshot>,
    register: Arc<FakeRegister>,
}

fn listings() -> [regscope_snapshot::RegisterListing; 3] {
    [
        listing("2024-00001", 89, 100, 110, (2024, 1, 2)),
        listing("2024-00002", 89, 200, 204, (2024, 1, 9)),
        listing("2024-00003", 89, 300, 310, (2024, 2, 1)),
    ]
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let data = DataDir::new(dir.path());
    let [first, second, third] = listings();

    let provider = FakeStructureProvider::new(vec![title(
        40,
        vec![chapter("I", vec![part("180", 400), part("182", 100)])],
    )])
    .with_citations(
        &PartRef::new(40, "180"),
        vec![
            site("§ 180.1", "[89 FR 105, Jan. 2, 2024]"),
            site("§ 180.2", "[89 FR 202, Jan. 9, 2024]"),
        ],
    )
    .with_citations(
        &PartRef::new(40, "182"),
        vec![site("§ 182.1", "[89 FR 101, Jan. 2, 2024; 89 FR 305, Feb. 1, 2024]")],
    )
    .with_documents(40, "180", vec![first.clone(), second.clone()])
    .with_documents(40, "182", vec![first.clone(), third.clone()]);
    let date = snapshot_date(SNAPSHOT);
    build(&data, &provider, date, BuildOptions::new())
        .await
        .unwrap();

    let register = FakeRegister::new(vec![epa()])
        .with_document(first, challenged_rule_text("2024-00001"))
        .with_document(second, routine_rule_text("2024-00002"))
        .with_document(third, challenged_rule_text("2024-00003"));

    Fixture {
        snapshot: Arc::new(Snapshot::open(&data, date).unwrap()),
        _dir: dir,
        data,
        register: Arc::new(register),
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::new()
        .with_workers(2)
        .with_rate_tier(RateTier::Production)
        .with_analysis(AnalysisConfig::default().with_retry(RetryPolicy::immediate(2)))
}

impl Fixture {
    fn orchestrator(&self, capability: Arc<dyn RemoteCapability>) -> Orchestrator {
        self.orchestrator_with(capability, config())
    }

    fn orchestrator_with(
        &self,
        capability: Arc<dyn RemoteCapability>,
        config: PipelineConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            self.data.clone(),
            self.snapshot.clone(),
            self.register.clone(),
            capability,
            config,
        )
        .unwrap()
    }
}

#[tokio::test]
async fn transient_register_failure_is_skipped_then_resumed() {
    let fx = fixture().await;
    fx.register.fail_transient(&doc_id("2024-00003"), 1);
    let capability = Arc::new(FakeCapability::new());
    let orchestrator = fx.orchestrator(capability.clone());

    let outcome = orchestrator.run(Scope::title(40)).await.unwrap();
    let run_id = outcome.run_id();
    assert_eq!(outcome.started, 3);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.summary.counts.done, 2);
    assert_eq!(outcome.summary.counts.skipped, 1);

    let state = load_state(&fx.data, run_id).unwrap();
    let ids: Vec<_> = state.units.keys().cloned().collect();
    assert_eq!(
        ids,
        vec![doc_id("2024-00001"), doc_id("2024-00002"), doc_id("2024-00003")]
    );
    assert_eq!(
        state.unit(&doc_id("2024-00001")).unwrap().parts,
        vec![PartRef::new(40, "180"), PartRef::new(40, "182")]
    );
    let skipped = state.unit(&doc_id("2024-00003")).unwrap();
    assert_eq!(skipped.status, UnitStatus::Skipped);
    assert!(skipped.reason.is_some());
    let record: UnitRecord = atomic::read_json(&fx.data.run_unit(run_id, &doc_id("2024-00003")))
        .unwrap()
        .unwrap();
    assert_eq!(record.status, UnitStatus::Skipped);
    assert!(fx.data.run_dir(run_id).join("coverage.json").is_file());

    let resumed = orchestrator.resume(run_id).await.unwrap();
    assert_eq!(resumed.started, 1);
    assert_eq!(resumed.summary.counts.done, 3);
    assert_eq!(fx.register.fetches(&doc_id("2024-00001")), 1);

    let export = orchestrator.export(run_id).unwrap();
    assert_eq!(export.rows.len(), 3);
    assert_eq!(export.summary.counts.done, 3);

    let challenged = &export.rows[0];
    assert_eq!(challenged.document_id, doc_id("2024-00001"));
    assert_eq!(challenged.verdict, Some(true));
    assert_eq!(challenged.citation.as_deref(), Some("89 FR 100"));
    assert_eq!(challenged.agency_shorthand, vec!["EPA".to_string()]);
    assert_eq!(challenged.affected_parts.len(), 2);
    assert_eq!(challenged.affected_word_count, 500);
    assert!(challenged.citation_excerpts[0].contains("lacks statutory authority"));

    let routine = &export.rows[1];
    assert_eq!(routine.verdict, Some(false));
    assert!(routine.citation_excerpts.is_empty());
    assert_eq!(routine.flags, vec![DataQualityFlag::NoRelevantChunks]);

    let lines = std::fs::read_to_string(fx.data.run_dir(run_id).join("export.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), 3);
    assert!(fx.data.run_dir(run_id).join("summary.json").is_file());
    assert_eq!(list_runs(&fx.data).unwrap().len(), 1);
}

#[tokio::test]
async fn unreadable_document_record_degrades_only_its_row() {
    let fx = fixture().await;
    let orchestrator = fx.orchestrator(Arc::new(FakeCapability::new()));
    let run_id = orchestrator.run(Scope::title(40)).await.unwrap().run_id();

    let broken = doc_id("2024-00002");
    std::fs::write(fx.data.document_details(&broken), "title = [not toml").unwrap();

    let export = orchestrator.export(run_id).unwrap();
    assert_eq!(export.rows.len(), 3);
    assert_eq!(export.rows[0].verdict, Some(true));
    assert!(export.rows[0].reason.is_none());

    let row = &export.rows[1];
    assert_eq!(row.document_id, broken);
    assert_eq!(row.status, UnitStatus::Done);
    assert_eq!(row.verdict, Some(false));
    assert_eq!(row.title.as_deref(), Some("Final rule 2024-00002"));
    assert_eq!(row.citation.as_deref(), Some("89 FR 200"));
    assert!(row.agency_shorthand.is_empty());
    assert!(row
        .reason
        .as_deref()
        .is_some_and(|r| r.contains("document details unreadable")));
}

#[tokio::test]
async fn resuming_a_finished_run_makes_no_external_calls() {
    let fx = fixture().await;
    let run_id = fx
        .orchestrator(Arc::new(FakeCapability::new()))
        .run(Scope::title(40))
        .await
        .unwrap()
        .run_id();
    let fetches = fx.register.total_fetches();

    let capability = Arc::new(FakeCapability::new());
    let orchestrator = fx.orchestrator(capability.clone());
    let outcome = orchestrator.resume(run_id).await.unwrap();
    assert_eq!(outcome.started, 0);
    assert_eq!(outcome.summary.counts.done, 3);
    assert_eq!(capability.total_calls(), 0);
    assert_eq!(orchestrator.stats().total_calls(), 0);
    assert_eq!(fx.register.total_fetches(), fetches);
}

#[tokio::test]
async fn interrupted_units_are_rerun_and_done_units_are_not() {
    let fx = fixture().await;
    let run_id = fx
        .orchestrator(Arc::new(FakeCapability::new()))
        .run(Scope::title(40))
        .await
        .unwrap()
        .run_id();

    // a process that died mid-run leaves units in progress or pending
    let mut state: RunState = load_state(&fx.data, run_id).unwrap();
    state.units.get_mut(&doc_id("2024-00002")).unwrap().status = UnitStatus::InProgress;
    state.units.get_mut(&doc_id("2024-00003")).unwrap().status = UnitStatus::Pending;
    state.save(&fx.data).unwrap();

    let outcome = fx
        .orchestrator(Arc::new(FakeCapability::new()))
        .resume(run_id)
        .await
        .unwrap();
    assert_eq!(outcome.started, 2);
    assert_eq!(outcome.summary.counts.done, 3);

    let state = load_state(&fx.data, run_id).unwrap();
    assert_eq!(state.unit(&doc_id("2024-00001")).unwrap().attempts, 1);
    assert_eq!(state.unit(&doc_id("2024-00002")).unwrap().attempts, 2);
    assert_eq!(state.unit(&doc_id("2024-00003")).unwrap().attempts, 2);
}

#[tokio::test]
async fn failed_analysis_is_recorded_and_retried_on_resume() {
    let fx = fixture().await;
    let capability = Arc::new(FakeCapability::new());
    capability.fail_next(
        Operation::Complete,
        vec![CapabilityError::Permanent("prompt rejected".to_string())],
    );
    let orchestrator = fx.orchestrator_with(capability.clone(), config().with_workers(1));

    let outcome = orchestrator.run(Scope::title(40)).await.unwrap();
    assert_eq!(outcome.summary.counts.failed, 1);
    let state = load_state(&fx.data, outcome.run_id()).unwrap();
    let failed = state.unit(&doc_id("2024-00001")).unwrap();
    assert_eq!(failed.status, UnitStatus::Failed);
    assert!(failed.reason.as_deref().unwrap().contains("judge"));

    let resumed = orchestrator.resume(outcome.run_id()).await.unwrap();
    assert_eq!(resumed.started, 1);
    assert_eq!(resumed.summary.counts.done, 3);

    let export = orchestrator.export(outcome.run_id()).unwrap();
    assert_eq!(export.rows[0].verdict, Some(true));
    assert!(export.rows[0].reason.is_none());
}

/// Cancels the run as soon as the first judgment is requested
struct CancelOnJudge {
    inner: FakeCapability,
    handle: OnceLock<CancelHandle>,
}

#[async_trait]
impl RemoteCapability for CancelOnJudge {
    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, CapabilityError> {
        self.inner.embed(model, texts, kind).await
    }

    async fn rerank(
        &self,
        model: &str,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, CapabilityError> {
        self.inner.rerank(model, query, documents, top_n).await
    }

    async fn complete(
        &self,
        model: &str,
        preamble: &str,
        prompt: &str,
    ) -> Result<String, CapabilityError> {
        if let Some(handle) = self.handle.get() {
            handle.cancel();
        }
        self.inner.complete(model, preamble, prompt).await
    }
}

#[tokio::test]
async fn cancellation_leaves_unstarted_units_pending() {
    let fx = fixture().await;
    let capability = Arc::new(CancelOnJudge {
        inner: FakeCapability::new(),
        handle: OnceLock::new(),
    });
    let orchestrator = fx.orchestrator_with(capability.clone(), config().with_workers(1));
    capability
        .handle
        .set(orchestrator.cancel_handle())
        .unwrap();

    let outcome = orchestrator.run(Scope::title(40)).await.unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.started, 1);
    assert_eq!(outcome.summary.counts.done, 1);
    assert_eq!(outcome.summary.counts.pending, 2);

    // a cancelled orchestrator starts nothing further
    let again = orchestrator.resume(outcome.run_id()).await.unwrap();
    assert_eq!(again.started, 0);

    let resumed = fx
        .orchestrator(Arc::new(FakeCapability::new()))
        .resume(outcome.run_id())
        .await
        .unwrap();
    assert_eq!(resumed.started, 2);
    assert_eq!(resumed.summary.counts.done, 3);
}

#[tokio::test]
async fn invalid_scope_or_configuration_fails_before_any_unit() {
    let fx = fixture().await;
    let capability = Arc::new(FakeCapability::new());
    let orchestrator = fx.orchestrator(capability.clone());

    for scope in [Scope::title(35), Scope::title(51), Scope::part(40, "999")] {
        let err = orchestrator.run(scope).await.unwrap_err();
        assert!(err.is_configuration(), "{err}");
    }
    assert!(list_runs(&fx.data).unwrap().is_empty());
    assert_eq!(fx.register.total_fetches(), 0);
    assert_eq!(capability.total_calls(), 0);

    let err = Orchestrator::new(
        fx.data.clone(),
        fx.snapshot.clone(),
        fx.register.clone(),
        capability.clone(),
        config().with_workers(0),
    )
    .unwrap_err();
    assert!(err.is_configuration());

    assert!(matches!(
        orchestrator.resume(RunId::new()).await,
        Err(PipelineError::UnknownRun(_))
    ));
}

#[tokio::test]
async fn resume_refuses_a_different_analysis_configuration() {
    let fx = fixture().await;
    let run_id = fx
        .orchestrator(Arc::new(FakeCapability::new()))
        .run(Scope::part(40, "182"))
        .await
        .unwrap()
        .run_id();

    let other = config().with_analysis(AnalysisConfig::default().with_top_k(10, 3));
    let err = fx
        .orchestrator_with(Arc::new(FakeCapability::new()), other)
        .resume(run_id)
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}
