use async_trait::async_trait;
use parking_lot::Mutex;
use regscope_analysis::{
    CallStats, CapabilityError, EmbedKind, Operation, RemoteCapability, RerankHit,
};
use std::collections::{HashMap, VecDeque};

const DIMENSIONS: usize = 64;
const PHRASE: &str = "statutory authority";

/// Deterministic model capability
///
/// - embeddings are hashed bags of words
/// - rerank relevance is the share of keywords a document contains
/// - completions answer yes, citing the sentence, when a shown chunk
///   mentions statutory authority, and no otherwise
///
/// Scripted completions and injected failures take precedence.
#[derive(Debug)]
pub struct FakeCapability {
    keywords: Vec<String>,
    completions: Mutex<VecDeque<String>>,
    failures: Mutex<HashMap<Operation, VecDeque<CapabilityError>>>,
    stats: CallStats,
}

impl Default for FakeCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCapability {
    pub fn new() -> Self {
        Self {
            keywords: ["statutory authority", "authority", "legal"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            completions: Mutex::new(VecDeque::new()),
            failures: Mutex::new(HashMap::new()),
            stats: CallStats::default(),
        }
    }

    /// Reply with `raw` to the next completion instead of judging
    pub fn script_completion(&self, raw: impl Into<String>) {
        self.completions.lock().push_back(raw.into());
    }

    /// Fail the next calls of `operation` with `errors`, in order
    pub fn fail_next(&self, operation: Operation, errors: Vec<CapabilityError>) {
        self.failures
            .lock()
            .entry(operation)
            .or_default()
            .extend(errors);
    }

    pub fn calls(&self, operation: Operation) -> u64 {
        self.stats.calls(operation)
    }

    pub fn total_calls(&self) -> u64 {
        self.stats.total_calls()
    }

    fn begin(&self, operation: Operation, chars: usize) -> Result<(), CapabilityError> {
        self.stats.record(operation, chars as u64);
        match self
            .failures
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            v[usize::from(hash.as_bytes()[0]) % DIMENSIONS] += 1.0;
        }
        v
    }

    fn relevance(&self, document: &str) -> f32 {
        let lower = document.to_lowercase();
        let hits = self.keywords.iter().filter(|k| lower.contains(k.as_str())).count();
        #[allow(clippy::cast_precision_loss)]
        let score = hits as f32 / self.keywords.len().max(1) as f32;
        score
    }

    fn judge(prompt: &str) -> String {
        for block in prompt.split("[chunk ").skip(1) {
            let Some((number, text)) = block.split_once("]\n") else {
                continue;
            };
            let Ok(chunk) = number.trim().parse::<usize>() else {
                continue;
            };
            let sentence = text
                .split('.')
                .map(str::trim)
                .find(|s| s.to_lowercase().contains(PHRASE));
            if let Some(sentence) = sentence {
                return serde_json::json!({
                    "answer": true,
                    "citations": [{ "chunk": chunk, "excerpt": sentence }],
                })
                .to_string();
            }
        }
        serde_json::json!({ "answer": false, "citations": [] }).to_string()
    }
}

#[async_trait]
impl RemoteCapability for FakeCapability {
    async fn embed(
        &self,
        _model: &str,
        texts: &[String],
        _kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, CapabilityError> {
        self.begin(Operation::Embed, texts.iter().map(String::len).sum())?;
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    async fn rerank(
        &self,
        _model: &str,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, CapabilityError> {
        self.begin(
            Operation::Rerank,
            query.len() + documents.iter().map(String::len).sum::<usize>(),
        )?;
        let mut hits: Vec<RerankHit> = documents
            .iter()
            .enumerate()
            .map(|(index, d)| RerankHit {
                index,
                relevance: self.relevance(d),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| a.index.cmp(&b.index))
        });
        hits.truncate(top_n);
        Ok(hits)
    }

    async fn complete(
        &self,
        _model: &str,
        preamble: &str,
        prompt: &str,
    ) -> Result<String, CapabilityError> {
        self.begin(Operation::Complete, preamble.len() + prompt.len())?;
        if let Some(scripted) = self.completions.lock().pop_front() {
            return Ok(scripted);
        }
        Ok(Self::judge(prompt))
    }
}
