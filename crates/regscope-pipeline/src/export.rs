//! Flat result table of a run

use crate::error::PipelineError;
use crate::state::{RunState, RunSummary, UnitStatus};
use chrono::NaiveDate;
use regscope_analysis::{load_result, AnalysisResult, DataQualityFlag};
use regscope_core::{DocumentId, RunId};
use regscope_snapshot::Snapshot;
use regscope_store::{atomic, DataDir, StoreError};
use regscope_workspace::SourceDocument;
use serde::{Deserialize, Serialize};

const EXPORT_FILE: &str = "export.jsonl";
const SUMMARY_FILE: &str = "summary.json";

/// One unit of a run, joined with its document and result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub document_id: DocumentId,
    pub citation: Option<String>,
    pub title: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub significant: bool,
    pub agencies: Vec<String>,
    pub agency_shorthand: Vec<String>,
    pub affected_parts: Vec<String>,
    pub affected_word_count: u64,
    pub status: UnitStatus,
    /// Set only for `done` units
    pub verdict: Option<bool>,
    pub citation_excerpts: Vec<String>,
    pub flags: Vec<DataQualityFlag>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Export {
    pub rows: Vec<ExportRow>,
    pub summary: RunSummary,
}

/// Write `export.jsonl` and `summary.json` for `run_id`
///
/// Rows follow run order. Document metadata comes from the workspace when
/// the document was ingested and from the snapshot listing otherwise. An
/// unreadable per-document record only degrades its own row, with the
/// problem noted in `reason`.
///
/// # Errors
/// - [`PipelineError::UnknownRun`] if the run does not exist
/// - [`PipelineError::Snapshot`] if its snapshot is gone
pub fn export(data: &DataDir, run_id: RunId) -> Result<Export, PipelineError> {
    let state = RunState::load(data, run_id)?;
    let snapshot = Snapshot::open(data, state.snapshot_date)?;

    let mut rows = Vec::with_capacity(state.units.len());
    for (id, unit) in &state.units {
        let mut reason = unit.reason.clone();
        let document: Option<SourceDocument> =
            match atomic::read_toml(&data.document_details(id)) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(
                        document_id = %id,
                        error = %e,
                        "document details unreadable, using snapshot listing"
                    );
                    note(&mut reason, format!("document details unreadable: {e}"));
                    None
                }
            };
        let result: Option<AnalysisResult> = if unit.status == UnitStatus::Done {
            match load_result(data, &state.config_version, id) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(document_id = %id, error = %e, "analysis result unreadable");
                    note(&mut reason, format!("analysis result unreadable: {e}"));
                    None
                }
            }
        } else {
            None
        };
        rows.push(row(
            id,
            unit.status,
            reason,
            &snapshot,
            document.as_ref(),
            result.as_ref(),
        ));
    }

    let run_dir = data.run_dir(run_id);
    let export_path = run_dir.join(EXPORT_FILE);
    let mut lines = String::new();
    for row in &rows {
        let line = serde_json::to_string(row).map_err(|source| StoreError::Json {
            path: export_path.clone(),
            source,
        })?;
        lines.push_str(&line);
        lines.push('\n');
    }
    atomic::write_bytes(&export_path, lines.as_bytes())?;
    let summary = state.summary();
    atomic::write_json(&run_dir.join(SUMMARY_FILE), &summary)?;

    tracing::info!(%run_id, rows = rows.len(), done = summary.counts.done, "run exported");
    Ok(Export { rows, summary })
}

fn note(reason: &mut Option<String>, problem: String) {
    *reason = Some(match reason.take() {
        Some(earlier) => format!("{earlier}; {problem}"),
        None => problem,
    });
}

fn row(
    id: &DocumentId,
    status: UnitStatus,
    reason: Option<String>,
    snapshot: &Snapshot,
    document: Option<&SourceDocument>,
    result: Option<&AnalysisResult>,
) -> ExportRow {
    let listing = snapshot.listing(id);
    let (citation, title, publication_date, significant, agencies, agency_shorthand) =
        match (document, listing) {
            (Some(doc), _) => (
                doc.citation.clone(),
                Some(doc.title.clone()),
                Some(doc.publication_date),
                doc.is_significant,
                doc.issuing_agencies.clone(),
                doc.issuing_agencies
                    .iter()
                    .filter_map(|a| doc.agency_shorthand.get(a).cloned())
                    .collect(),
            ),
            (None, Some(listing)) => (
                listing.citation.clone(),
                Some(listing.title.clone()),
                Some(listing.publication_date),
                listing.significant,
                listing.agency_names.clone(),
                Vec::new(),
            ),
            (None, None) => (None, None, None, false, Vec::new(), Vec::new()),
        };

    ExportRow {
        document_id: id.clone(),
        citation,
        title,
        publication_date,
        significant,
        agencies,
        agency_shorthand,
        affected_parts: snapshot
            .parts_for_document(id)
            .iter()
            .map(ToString::to_string)
            .collect(),
        affected_word_count: snapshot.affected_word_count(id),
        status,
        verdict: result.map(|r| r.answer),
        citation_excerpts: result
            .map(|r| r.citations.iter().map(|c| c.excerpt.clone()).collect())
            .unwrap_or_default(),
        flags: result.map(|r| r.flags.clone()).unwrap_or_default(),
        reason,
    }
}
