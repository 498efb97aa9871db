//! Snapshot capture and query tests against the in-memory provider

use regscope_core::{NodeKind, PartRef, Scope};
use regscope_snapshot::{build, BuildOptions, Snapshot, SnapshotError};
use regscope_store::DataDir;
use regscope_test_utils::{
    chapter, doc_id, listing, part, reserved_part, site, snapshot_date, title,
    FakeStructureProvider,
};
use tempfile::TempDir;

fn provider() -> FakeStructureProvider {
    FakeStructureProvider::new(vec![
        title(15, vec![chapter("I", vec![part("4", 100), part("4a", 50)])]),
        title(
            40,
            vec![chapter(
                "I",
                vec![part("180", 500), reserved_part("181"), part("182", 200)],
            )],
        ),
    ])
    .with_citations(
        &PartRef::new(40, "180"),
        vec![
            site(
                "§ 180.1",
                "[77 FR 46290, Aug. 3, 2012, as amended at 78 FR 1240, Jan. 8, 2013]",
            ),
            site("§ 180.2", "[60 FR 100, Jan. 3, 1995]"),
        ],
    )
    .with_citations(
        &PartRef::new(40, "182"),
        vec![site("§ 182.1", "[78 FR 1245, Jan. 8, 2013]")],
    )
    .with_citations(
        &PartRef::new(15, "4a"),
        vec![site("§ 4a.1", "[79 FR 10, Jan. 2, 2014]")],
    )
    .with_documents(
        40,
        "180",
        vec![
            listing("2013-00100", 78, 1234, 1250, (2013, 1, 8)),
            listing("2012-18900", 77, 46288, 46295, (2012, 8, 3)),
        ],
    )
    .with_documents(40, "182", vec![listing("2013-00100", 78, 1234, 1250, (2013, 1, 8))])
    .with_documents(15, "4", vec![listing("2014-00001", 79, 5, 12, (2014, 1, 2))])
}

fn setup() -> (TempDir, DataDir) {
    let dir = TempDir::new().unwrap();
    let data = DataDir::new(dir.path());
    (dir, data)
}

#[tokio::test]
async fn captured_snapshot_answers_attribution_queries() {
    let (_dir, data) = setup();
    let date = snapshot_date("2024-12-30");
    let manifest = build(&data, &provider(), date, BuildOptions::new())
        .await
        .unwrap();
    assert!(manifest.is_complete());
    assert_eq!(manifest.parts_total, 4);
    assert_eq!(manifest.titles, vec![15, 40]);
    assert_eq!(manifest.documents_attributed, 3);

    let snapshot = Snapshot::open(&data, date).unwrap();
    assert_eq!(
        snapshot.attribute(&PartRef::new(40, "180")).unwrap(),
        vec![doc_id("2012-18900"), doc_id("2013-00100")]
    );
    assert_eq!(
        snapshot.parts_for_document(&doc_id("2013-00100")),
        &[PartRef::new(40, "180"), PartRef::new(40, "182")]
    );
    assert_eq!(snapshot.affected_word_count(&doc_id("2013-00100")), 700);

    // lettered parts are looked up by their numeric portion
    assert_eq!(
        snapshot.attribute(&PartRef::new(15, "4a")).unwrap(),
        vec![doc_id("2014-00001")]
    );
    assert!(snapshot.attribute(&PartRef::new(15, "4")).unwrap().is_empty());
    assert!(matches!(
        snapshot.attribute(&PartRef::new(40, "181")),
        Err(SnapshotError::UnknownPart(_))
    ));
    assert!(snapshot.listing(&doc_id("2012-18900")).is_some());
}

#[tokio::test]
async fn complete_snapshot_is_not_rebuilt_without_force() {
    let (_dir, data) = setup();
    let provider = provider();
    let date = snapshot_date("2024-12-30");

    build(&data, &provider, date, BuildOptions::new()).await.unwrap();
    let calls = provider.calls();
    build(&data, &provider, date, BuildOptions::new()).await.unwrap();
    assert_eq!(provider.calls(), calls);

    build(&data, &provider, date, BuildOptions::new().force())
        .await
        .unwrap();
    assert!(provider.calls() > calls);
}

#[tokio::test]
async fn unresolved_parts_leave_a_usable_partial_snapshot() {
    let (_dir, data) = setup();
    let provider = provider();
    let date = snapshot_date("2024-12-30");
    provider.fail_part(&PartRef::new(40, "182"), 1);

    let err = build(&data, &provider, date, BuildOptions::new())
        .await
        .unwrap_err();
    match &err {
        SnapshotError::Incomplete { unresolved, .. } => {
            assert_eq!(unresolved, &vec![PartRef::new(40, "182")]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_partial());

    let snapshot = Snapshot::open(&data, date).unwrap();
    assert!(!snapshot.part(&PartRef::new(40, "182")).unwrap().resolved);
    assert_eq!(snapshot.attribute(&PartRef::new(40, "180")).unwrap().len(), 2);
    let report = snapshot.coverage_report(&Scope::title(40)).unwrap();
    assert_eq!(report.unresolved, vec![PartRef::new(40, "182")]);
    assert_eq!(report.covered, 1);

    // the failure was transient; building again completes the snapshot
    let manifest = build(&data, &provider, date, BuildOptions::new())
        .await
        .unwrap();
    assert!(manifest.is_complete());
}

#[tokio::test]
async fn partial_rebuild_keeps_parts_resolved_earlier() {
    let (_dir, data) = setup();
    let provider = provider();
    let date = snapshot_date("2024-12-30");
    provider.fail_part(&PartRef::new(40, "182"), 1);
    build(&data, &provider, date, BuildOptions::new())
        .await
        .unwrap_err();

    // a different part fails on the retry
    provider.fail_part(&PartRef::new(40, "180"), 1);
    let calls = provider.calls();
    let manifest = build(&data, &provider, date, BuildOptions::new())
        .await
        .unwrap();
    assert!(manifest.is_complete());
    // only 40/182 is asked for again: its citations and its documents
    assert_eq!(provider.calls() - calls, 2);

    let snapshot = Snapshot::open(&data, date).unwrap();
    assert_eq!(
        snapshot.attribute(&PartRef::new(40, "180")).unwrap(),
        vec![doc_id("2012-18900"), doc_id("2013-00100")]
    );
    assert_eq!(
        snapshot.attribute(&PartRef::new(40, "182")).unwrap(),
        vec![doc_id("2013-00100")]
    );
    assert!(snapshot.listing(&doc_id("2012-18900")).is_some());
    assert_eq!(manifest.documents_attributed, 3);
}

#[tokio::test]
async fn forced_rebuild_never_loses_earlier_attribution() {
    let (_dir, data) = setup();
    let provider = provider();
    let date = snapshot_date("2024-12-30");
    build(&data, &provider, date, BuildOptions::new()).await.unwrap();

    provider.fail_part(&PartRef::new(40, "180"), 1);
    let manifest = build(&data, &provider, date, BuildOptions::new().force())
        .await
        .unwrap();
    assert!(manifest.is_complete());
    let snapshot = Snapshot::open(&data, date).unwrap();
    assert_eq!(snapshot.attribute(&PartRef::new(40, "180")).unwrap().len(), 2);

    provider.fail_titles(1);
    let err = build(&data, &provider, date, BuildOptions::new().force())
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Provider(_)));

    let snapshot = Snapshot::open(&data, date).unwrap();
    assert!(snapshot.manifest().is_complete());
    assert_eq!(snapshot.attribute(&PartRef::new(40, "180")).unwrap().len(), 2);
    assert_eq!(Snapshot::list(&data).unwrap().len(), 1);
}

#[tokio::test]
async fn latest_picks_the_newest_snapshot() {
    let (_dir, data) = setup();
    let provider = provider();
    assert!(matches!(
        Snapshot::latest(&data),
        Err(SnapshotError::NoSnapshots)
    ));
    for date in ["2024-06-30", "2024-12-30"] {
        build(&data, &provider, snapshot_date(date), BuildOptions::new())
            .await
            .unwrap();
    }
    assert_eq!(
        Snapshot::latest(&data).unwrap().date(),
        snapshot_date("2024-12-30")
    );
    assert_eq!(Snapshot::list(&data).unwrap().len(), 2);
    assert!(matches!(
        Snapshot::open(&data, snapshot_date("2023-01-01")),
        Err(SnapshotError::NotFound(_))
    ));
}

#[tokio::test]
async fn scopes_expand_to_non_reserved_parts() {
    let (_dir, data) = setup();
    let date = snapshot_date("2024-12-30");
    build(&data, &provider(), date, BuildOptions::new())
        .await
        .unwrap();
    let snapshot = Snapshot::open(&data, date).unwrap();

    let title_40 = vec![PartRef::new(40, "180"), PartRef::new(40, "182")];
    assert_eq!(snapshot.expand_scope(&Scope::title(40)).unwrap(), title_40);
    let chapter = Scope::Division {
        title: 40,
        division: NodeKind::Chapter,
        identifier: "I".to_string(),
    };
    assert_eq!(snapshot.expand_scope(&chapter).unwrap(), title_40);
    assert_eq!(snapshot.expand_scope(&Scope::All).unwrap().len(), 4);
    assert_eq!(
        snapshot.expand_scope(&Scope::part(15, "4a")).unwrap(),
        vec![PartRef::new(15, "4a")]
    );

    for invalid in [
        Scope::title(35),
        Scope::title(51),
        Scope::title(7),
        Scope::part(40, "181"),
        Scope::part(40, "999"),
        Scope::Division {
            title: 40,
            division: NodeKind::Chapter,
            identifier: "IX".to_string(),
        },
    ] {
        let err = snapshot.expand_scope(&invalid).unwrap_err();
        assert!(err.is_configuration(), "{invalid}: {err}");
    }
}

#[tokio::test]
async fn coverage_report_accounts_for_citations_and_words() {
    let (_dir, data) = setup();
    let date = snapshot_date("2024-12-30");
    build(&data, &provider(), date, BuildOptions::new())
        .await
        .unwrap();
    let snapshot = Snapshot::open(&data, date).unwrap();

    let report = snapshot.coverage_report(&Scope::title(40)).unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.covered, 2);
    assert!(report.unresolved.is_empty());
    assert_eq!(report.total_word_count, 700);

    let part_180 = report.part(&PartRef::new(40, "180")).unwrap();
    assert_eq!(part_180.citations, 3);
    assert_eq!(part_180.citations_attributed, 2);
    assert_eq!(part_180.unattributed, vec!["60 FR 100".to_string()]);
    assert_eq!(part_180.documents_affecting, 2);
    assert_eq!(part_180.documents_attributed, 2);
    assert!((report.citation_coverage() - 0.75).abs() < 1e-9);

    let title_node = &snapshot.titles()[1];
    assert!(title_node.word_counts_consistent());
    assert_eq!(title_node.total_words(), 700);
}
