//! Question and prompt construction

use crate::config::AnalysisConfig;
use regscope_workspace::SourceDocument;

/// Review-task preamble sent with every completion
pub const DEFAULT_PREAMBLE: &str = "## Task & Context\n\
You have been given a Final Rule document which is a document published by a U.S. federal \
government agency that establishes a new regulation. In a Final Rule document, the agency \
issuing the Rule responds to any significant, relevant issues raised in public comments about \
the Rule during the rule-making process. For each public comment in the Final Rule, the agency \
will first describe the comment from the public and then offer the agency's response. You are \
being asked to look over all of the comments described in this Final Rule and determine if any \
of the public commenters raised concerns that the agency is not acting with authority from \
Congress by issuing this rule. You will only answer yes or no.";

/// Question template; `{agencies}` and `{pronoun}` are substituted
pub const DEFAULT_QUESTION: &str = "Did {agencies} receive any public comments questioning \
{pronoun} legal or statutory authority to issue this Final Rule?";

const RESPONSE_FORMAT: &str = "Respond with a single JSON object and nothing else: \
{\"answer\": true or false, \"citations\": [{\"chunk\": <chunk number>, \"excerpt\": \
\"<text copied verbatim from that chunk>\"}]}. Give citations only when the answer is true.";

/// Prompt blocks shorter than this are dropped rather than truncated
const MIN_BLOCK_CHARS: usize = 200;

/// The question asked of one document
#[must_use]
pub fn question(template: &str, document: &SourceDocument) -> String {
    let agencies = document.agency_phrases();
    let named = if agencies.is_empty() {
        "the issuing agency".to_string()
    } else {
        agencies.join(" or ")
    };
    let pronoun = if agencies.len() > 1 { "their" } else { "its" };
    template
        .replace("{agencies}", &named)
        .replace("{pronoun}", pronoun)
}

/// A chunk as shown to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedChunk {
    pub ordinal: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub preamble: String,
    pub body: String,
    /// Chunks that made it into `body`, possibly truncated
    pub included: Vec<IncludedChunk>,
}

/// Assemble the judgment prompt within `config.max_prompt_chars`
///
/// `chunks` are `(ordinal, text)` in relevance order.
#[must_use]
pub fn build(
    config: &AnalysisConfig,
    document: &SourceDocument,
    question: &str,
    chunks: &[(usize, &str)],
) -> Prompt {
    let citation = document.citation.as_deref().unwrap_or("no citation");
    let header = format!(
        "{question}\n\nDocument: {} ({citation}), published {}\n\nExcerpts:\n",
        document.title, document.publication_date
    );
    let footer = format!("\n{RESPONSE_FORMAT}\n");

    let budget = config
        .max_prompt_chars
        .saturating_sub(config.preamble.len() + header.len() + footer.len());
    let mut body = header;
    let mut used = 0;
    let mut included = Vec::new();
    for &(ordinal, text) in chunks {
        let label = format!("[chunk {ordinal}]\n");
        let overhead = label.len() + 2;
        let room = budget.saturating_sub(used + overhead);
        if room < MIN_BLOCK_CHARS.min(text.len()) || room == 0 {
            break;
        }
        let shown = truncate(text, room);
        body.push_str(&label);
        body.push_str(shown);
        body.push_str("\n\n");
        used += overhead + shown.len();
        included.push(IncludedChunk {
            ordinal,
            text: shown.to_string(),
        });
    }
    body.push_str(&footer);

    Prompt {
        preamble: config.preamble.clone(),
        body,
        included,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use regscope_core::{ContentHash, DocumentId};
    use std::collections::BTreeMap;

    fn document(agencies: &[(&str, &str)]) -> SourceDocument {
        SourceDocument {
            id: DocumentId::parse("2012-18900").unwrap(),
            citation: Some("77 FR 46288".to_string()),
            title: "Pesticide tolerances".to_string(),
            abstract_text: String::new(),
            publication_date: NaiveDate::from_ymd_opt(2012, 8, 3).unwrap(),
            start_page: Some(46288),
            end_page: Some(46295),
            is_significant: false,
            issuing_agencies: agencies.iter().map(|(n, _)| n.to_string()).collect(),
            agency_shorthand: agencies
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect::<BTreeMap<_, _>>(),
            affected_parts: vec![],
            content_hash: ContentHash::compute(b""),
            word_count: 0,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn question_names_agencies_with_pronoun() {
        let one = document(&[("Environmental Protection Agency", "EPA")]);
        assert_eq!(
            question(DEFAULT_QUESTION, &one),
            "Did the Environmental Protection Agency (EPA) receive any public comments \
             questioning its legal or statutory authority to issue this Final Rule?"
        );
        let two = document(&[
            ("Environmental Protection Agency", "EPA"),
            ("Department of Agriculture", "USDA"),
        ]);
        let q = question(DEFAULT_QUESTION, &two);
        assert!(q.contains(
            "the Environmental Protection Agency (EPA) or the Department of Agriculture (USDA)"
        ));
        assert!(q.contains("questioning their legal"));
    }

    #[test]
    fn prompt_respects_bound() {
        let config = AnalysisConfig {
            max_prompt_chars: 3_000,
            ..AnalysisConfig::default()
        };
        let doc = document(&[("Environmental Protection Agency", "EPA")]);
        let long = "commenters argued the agency lacks statutory authority ".repeat(40);
        let chunks = vec![(3, long.as_str()), (9, long.as_str()), (1, long.as_str())];
        let prompt = build(&config, &doc, "Q?", &chunks);
        assert!(prompt.preamble.len() + prompt.body.len() <= config.max_prompt_chars);
        assert!(!prompt.included.is_empty());
        assert_eq!(prompt.included[0].ordinal, 3);
        assert!(prompt.body.contains("[chunk 3]"));
        assert!(prompt.body.contains("77 FR 46288"));
    }
}
