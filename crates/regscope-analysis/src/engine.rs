//! Per-document analysis
//!
//! chunk -> embed -> retrieve -> rerank -> judge, with every intermediate
//! artifact persisted under `analysis/<config-version>/<doc-id>/`. A stored
//! result is final for its configuration version and document text; a
//! stored retrieval lets a retry resume at judgment.

use crate::capability::{EmbedKind, RemoteCapability};
use crate::chunk::ChunkIndex;
use crate::config::AnalysisConfig;
use crate::embed::{EmbedRequest, EmbeddingCache};
use crate::error::{AnalysisError, CapabilityError, Stage};
use crate::prompt;
use crate::retrieve::{apply_rerank, top_k, Retrieval, ScoredChunk};
use crate::verdict::{self, Citation, DataQualityFlag};
use chrono::{DateTime, Utc};
use regscope_core::{ContentHash, DocumentId};
use regscope_store::{atomic, DataDir, RecordCache};
use regscope_workspace::{SourceDocument, WorkspaceBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const RESULT_FILE: &str = "result.json";
const RETRIEVAL_FILE: &str = "retrieval.json";
const LOG_FILE: &str = "log.jsonl";

/// Final outcome of analyzing one document under one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub document_id: DocumentId,
    /// Content hash of the full text this result was computed from
    pub text_hash: ContentHash,
    pub answer: bool,
    /// Empty whenever `answer` is false
    pub citations: Vec<Citation>,
    pub question: String,
    pub prompt_version: String,
    pub config_version: String,
    pub model: String,
    pub chunk_count: usize,
    /// Ordinals of the chunks shown to the model
    pub retrieved: Vec<usize>,
    #[serde(default)]
    pub flags: Vec<DataQualityFlag>,
    pub created_at: DateTime<Utc>,
    /// Machine-readable log of the analysis
    pub raw_log: PathBuf,
}

impl AnalysisResult {
    #[must_use]
    pub fn has_flag(&self, flag: DataQualityFlag) -> bool {
        self.flags.contains(&flag)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Recompute even if a result exists for this configuration version
    pub force: bool,
}

#[derive(Serialize)]
struct LogEvent<'a> {
    at: DateTime<Utc>,
    stage: Stage,
    event: &'a str,
    detail: serde_json::Value,
}

/// Stored result of `id` under `config_version`, if any
///
/// # Errors
/// [`AnalysisError::Store`] if the record is unreadable
pub fn load_result(
    data: &DataDir,
    config_version: &str,
    id: &DocumentId,
) -> Result<Option<AnalysisResult>, AnalysisError> {
    Ok(atomic::read_json(
        &data.analysis_dir(config_version, id).join(RESULT_FILE),
    )?)
}

/// Runs the analysis pipeline for documents of one workspace
pub struct AnalysisEngine {
    data: DataDir,
    workspace: Arc<WorkspaceBuilder>,
    capability: Arc<dyn RemoteCapability>,
    config: AnalysisConfig,
    version: String,
    embeddings: EmbeddingCache,
    chunk_indexes: RecordCache<ContentHash, ChunkIndex>,
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("version", &self.version)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl AnalysisEngine {
    /// # Errors
    /// [`AnalysisError::Configuration`] if `config` is invalid
    pub fn new(
        data: DataDir,
        workspace: Arc<WorkspaceBuilder>,
        capability: Arc<dyn RemoteCapability>,
        config: AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            embeddings: EmbeddingCache::new(data.clone()),
            version: config.version(),
            data,
            workspace,
            capability,
            config,
            chunk_indexes: RecordCache::new(1_000),
        })
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Stored result for `id` under this engine's configuration
    ///
    /// # Errors
    /// [`AnalysisError::Store`] if the record is unreadable
    pub fn load_result(&self, id: &DocumentId) -> Result<Option<AnalysisResult>, AnalysisError> {
        load_result(&self.data, &self.version, id)
    }

    /// Analyze one ingested document
    ///
    /// # Errors
    /// - [`AnalysisError::Failed`] when a remote stage exhausts its retries
    /// - [`AnalysisError::Workspace`] if the document is not ingested
    pub async fn analyze(
        &self,
        id: &DocumentId,
        options: AnalyzeOptions,
    ) -> Result<AnalysisResult, AnalysisError> {
        let dir = self.data.analysis_dir(&self.version, id);
        if !options.force {
            if let Some(existing) = atomic::read_json::<AnalysisResult>(&dir.join(RESULT_FILE))? {
                let document = self.workspace.load(id).await?;
                if existing.text_hash == document.content_hash {
                    tracing::debug!(document_id = %id, version = %self.version, "analysis result reused");
                    return Ok(existing);
                }
                tracing::info!(
                    document_id = %id,
                    stored = %existing.text_hash.short(),
                    current = %document.content_hash.short(),
                    "document text changed, recomputing analysis"
                );
            }
        }

        let log_path = dir.join(LOG_FILE);
        match self.compute(id, &dir, &log_path, options).await {
            Ok(result) => {
                atomic::write_json(&dir.join(RESULT_FILE), &result)?;
                log_event(
                    &log_path,
                    Stage::Judge,
                    "result",
                    serde_json::json!({ "answer": result.answer, "flags": result.flags }),
                );
                tracing::info!(
                    document_id = %id,
                    answer = result.answer,
                    citations = result.citations.len(),
                    flags = ?result.flags,
                    "document analyzed"
                );
                Ok(result)
            }
            Err(e) => {
                let stage = e.stage().unwrap_or(Stage::Load);
                log_event(&log_path, stage, "failed", serde_json::json!({ "error": e.to_string() }));
                tracing::warn!(document_id = %id, %stage, error = %e, "analysis failed");
                Err(e)
            }
        }
    }

    async fn compute(
        &self,
        id: &DocumentId,
        dir: &Path,
        log_path: &Path,
        options: AnalyzeOptions,
    ) -> Result<AnalysisResult, AnalysisError> {
        let document = self.workspace.load(id).await?;
        let text = self.workspace.full_text(id).await?;
        let index = self.chunk_index(&document, &text).await?;
        let chunk_texts = index.texts(&text);
        log_event(
            log_path,
            Stage::Chunk,
            "chunked",
            serde_json::json!({ "chunks": index.len(), "words": document.word_count }),
        );

        let question = prompt::question(&self.config.question_template, &document);
        let retrieval = self
            .retrieval(dir, log_path, &index, &chunk_texts, &question, options.force)
            .await?;

        let mut result = AnalysisResult {
            document_id: id.clone(),
            text_hash: document.content_hash,
            answer: false,
            citations: Vec::new(),
            question,
            prompt_version: self.config.prompt_version.clone(),
            config_version: self.version.clone(),
            model: self.config.completion_model.clone(),
            chunk_count: index.len(),
            retrieved: Vec::new(),
            flags: Vec::new(),
            created_at: Utc::now(),
            raw_log: log_path.to_path_buf(),
        };

        if retrieval.retained.is_empty() {
            result.flags.push(DataQualityFlag::NoRelevantChunks);
            return Ok(result);
        }

        let shown: Vec<(usize, &str)> = retrieval
            .retained
            .iter()
            .filter_map(|c| chunk_texts.get(c.ordinal).map(|t| (c.ordinal, *t)))
            .collect();
        let prompt = prompt::build(&self.config, &document, &result.question, &shown);
        result.retrieved = prompt.included.iter().map(|c| c.ordinal).collect();
        if prompt.included.is_empty() {
            result.flags.push(DataQualityFlag::NoRelevantChunks);
            return Ok(result);
        }

        let capability = self.capability.as_ref();
        let model = self.config.completion_model.as_str();
        let (preamble, body) = (prompt.preamble.as_str(), prompt.body.as_str());
        let (raw, parsed) = self
            .config
            .retry
            .run(Stage::Judge, || async move {
                let raw = capability.complete(model, preamble, body).await?;
                let parsed = verdict::parse(&raw).map_err(CapabilityError::InvalidResponse)?;
                Ok((raw, parsed))
            })
            .await?;
        log_event(
            log_path,
            Stage::Judge,
            "completion",
            serde_json::json!({
                "prompt_chars": preamble.len() + body.len(),
                "chunks": result.retrieved,
                "response": raw,
            }),
        );

        let (checked, flag) = verdict::validate(parsed, &prompt.included);
        if let Some(flag) = flag {
            tracing::warn!(document_id = %id, ?flag, "citations rejected");
            result.flags.push(flag);
        }
        result.answer = checked.answer;
        result.citations = checked.citations;
        Ok(result)
    }

    async fn chunk_index(
        &self,
        document: &SourceDocument,
        text: &str,
    ) -> Result<Arc<ChunkIndex>, AnalysisError> {
        let params = self.config.chunking;
        let key = ChunkIndex::key(&document.content_hash, params);
        let path = self.data.chunk_index(&key);
        self.chunk_indexes
            .try_get_or_insert_with(key, || async {
                if let Some(stored) = atomic::read_json::<ChunkIndex>(&path)? {
                    if stored.text_hash == document.content_hash && stored.params == params {
                        tracing::debug!(document_id = %document.id, "chunk index reused");
                        return Ok(stored);
                    }
                }
                let index = ChunkIndex::build(text, params);
                atomic::write_json(&path, &index)?;
                Ok::<_, AnalysisError>(index)
            })
            .await
    }

    async fn retrieval(
        &self,
        dir: &Path,
        log_path: &Path,
        index: &ChunkIndex,
        chunk_texts: &[&str],
        question: &str,
        force: bool,
    ) -> Result<Retrieval, AnalysisError> {
        let path = dir.join(RETRIEVAL_FILE);
        if !force {
            if let Some(stored) = atomic::read_json::<Retrieval>(&path)? {
                if stored.text_hash == index.text_hash && stored.query == question {
                    tracing::debug!(path = %path.display(), "retrieval reused");
                    return Ok(stored);
                }
            }
        }

        let candidates = if chunk_texts.is_empty() {
            Vec::new()
        } else {
            self.rank_candidates(chunk_texts, question).await?
        };
        let retained = if candidates.is_empty() {
            Vec::new()
        } else {
            self.rerank(&candidates, chunk_texts, question).await?
        };

        let retrieval = Retrieval {
            text_hash: index.text_hash,
            query: question.to_string(),
            candidates,
            retained,
            created_at: Utc::now(),
        };
        atomic::write_json(&path, &retrieval)?;
        log_event(
            log_path,
            Stage::Retrieve,
            "retrieved",
            serde_json::json!({
                "candidates": retrieval.candidates.len(),
                "retained": retrieval.retained_ordinals(),
            }),
        );
        Ok(retrieval)
    }

    async fn rank_candidates(
        &self,
        chunk_texts: &[&str],
        question: &str,
    ) -> Result<Vec<ScoredChunk>, AnalysisError> {
        let capability = self.capability.as_ref();
        let request = EmbedRequest {
            model: &self.config.embed_model,
            kind: EmbedKind::Document,
            batch_size: self.config.embed_batch,
            retry: &self.config.retry,
        };
        let vectors = self
            .embeddings
            .embed_all(capability, request, chunk_texts)
            .await?;
        let query = self
            .embeddings
            .embed_all(
                capability,
                EmbedRequest {
                    kind: EmbedKind::Query,
                    ..request
                },
                &[question],
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::Failed {
                stage: Stage::Embed,
                attempts: 0,
                last_error: "no query embedding".to_string(),
            })?;
        Ok(top_k(&query, &vectors, self.config.retrieve_top_k))
    }

    async fn rerank(
        &self,
        candidates: &[ScoredChunk],
        chunk_texts: &[&str],
        question: &str,
    ) -> Result<Vec<ScoredChunk>, AnalysisError> {
        let documents: Vec<String> = candidates
            .iter()
            .map(|c| chunk_texts.get(c.ordinal).copied().unwrap_or_default().to_string())
            .collect();
        let documents = &documents;
        let capability = self.capability.as_ref();
        let model = self.config.rerank_model.as_str();
        let (top_n, min_relevance) = (self.config.rerank_top_n, self.config.min_relevance);
        self.config
            .retry
            .run(Stage::Rerank, || async move {
                let hits = capability
                    .rerank(model, question, documents, top_n)
                    .await?;
                apply_rerank(candidates, &hits, top_n, min_relevance).ok_or_else(|| {
                    CapabilityError::InvalidResponse("rerank hit outside candidates".to_string())
                })
            })
            .await
    }
}

fn log_event(path: &Path, stage: Stage, event: &str, detail: serde_json::Value) {
    let entry = LogEvent {
        at: Utc::now(),
        stage,
        event,
        detail,
    };
    if let Err(e) = atomic::append_json_line(path, &entry) {
        tracing::warn!(path = %path.display(), error = %e, "could not append analysis log");
    }
}
