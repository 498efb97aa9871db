//! Parsing and checking model verdicts

use crate::prompt::IncludedChunk;
use serde::{Deserialize, Serialize};

/// Passage supporting a positive answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk: usize,
    pub excerpt: String,
}

/// Data-quality flag attached to an otherwise successful result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityFlag {
    /// Retrieval kept nothing, the answer defaulted to false
    NoRelevantChunks,
    /// The model's citations could not be verified and were dropped
    MalformedCitation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub answer: bool,
    pub citations: Vec<Citation>,
}

#[derive(Deserialize)]
struct RawVerdict {
    answer: serde_json::Value,
    #[serde(default)]
    citations: Vec<Citation>,
}

fn answer_word(text: &str) -> Option<bool> {
    let word: String = text
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match word.as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

fn from_json(raw: &str) -> Option<Verdict> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: RawVerdict = serde_json::from_str(&raw[start..=end]).ok()?;
    let answer = match parsed.answer {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => answer_word(&s)?,
        _ => return None,
    };
    Some(Verdict {
        answer,
        citations: parsed.citations,
    })
}

/// Read a completion as a verdict
///
/// Accepts a JSON object, optionally fenced or wrapped in prose, or a
/// reply that starts with yes/no.
///
/// # Errors
/// Returns a description of the reply when neither form is found
pub fn parse(raw: &str) -> Result<Verdict, String> {
    if let Some(verdict) = from_json(raw) {
        return Ok(verdict);
    }
    if let Some(answer) = answer_word(raw) {
        return Ok(Verdict {
            answer,
            citations: Vec::new(),
        });
    }
    let preview: String = raw.chars().take(80).collect();
    Err(format!("no verdict in reply {preview:?}"))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Verify citations against the chunks the model was shown
///
/// A negative answer never carries citations. If any citation names an
/// unknown chunk or quotes text absent from it, all citations are
/// dropped and the result is flagged.
#[must_use]
pub fn validate(verdict: Verdict, shown: &[IncludedChunk]) -> (Verdict, Option<DataQualityFlag>) {
    if !verdict.answer {
        return (
            Verdict {
                answer: false,
                citations: Vec::new(),
            },
            None,
        );
    }
    let valid = verdict.citations.iter().all(|citation| {
        let excerpt = normalize(&citation.excerpt);
        !excerpt.is_empty()
            && shown
                .iter()
                .find(|c| c.ordinal == citation.chunk)
                .is_some_and(|c| normalize(&c.text).contains(&excerpt))
    });
    if valid {
        (verdict, None)
    } else {
        (
            Verdict {
                answer: true,
                citations: Vec::new(),
            },
            Some(DataQualityFlag::MalformedCitation),
        )
    }
}
