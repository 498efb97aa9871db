//! Deterministic text chunking
//!
//! Chunks are byte ranges into the document text. Boundaries prefer a
//! paragraph break, then whitespace, and always fall on UTF-8 character
//! boundaries. Consecutive chunks overlap by roughly `overlap` bytes,
//! with the overlap starting at a word.

use regscope_core::ContentHash;
use serde::{Deserialize, Serialize};

/// Bumped whenever the boundary algorithm changes
const CHUNKER_REVISION: &[u8] = b"paragraph-whitespace-1";

/// Chunk size limits, in bytes of UTF-8 text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkParams {
    pub max_chars: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chars: 1_500,
            overlap: 150,
        }
    }
}

impl ChunkParams {
    /// Reason the parameters are unusable, if any
    #[must_use]
    pub fn problem(&self) -> Option<String> {
        if self.max_chars == 0 {
            Some("chunk size must be positive".to_string())
        } else if self.overlap >= self.max_chars {
            Some(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.overlap, self.max_chars
            ))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
}

/// Chunk boundaries of one text under one set of parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIndex {
    pub text_hash: ContentHash,
    pub params: ChunkParams,
    pub spans: Vec<ChunkSpan>,
}

impl ChunkIndex {
    /// Chunk `text`
    #[must_use]
    pub fn build(text: &str, params: ChunkParams) -> Self {
        let spans = split(text, params)
            .into_iter()
            .enumerate()
            .map(|(ordinal, (start, end))| ChunkSpan {
                ordinal,
                start,
                end,
            })
            .collect();
        Self {
            text_hash: ContentHash::compute(text.as_bytes()),
            params,
            spans,
        }
    }

    /// Cache key for a text hash and parameters
    #[must_use]
    pub fn key(text_hash: &ContentHash, params: ChunkParams) -> ContentHash {
        ContentHash::compute_fields(&[
            CHUNKER_REVISION,
            text_hash.as_bytes(),
            &(params.max_chars as u64).to_le_bytes(),
            &(params.overlap as u64).to_le_bytes(),
        ])
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Text of every chunk, in ordinal order
    ///
    /// Spans that do not fit `text` (a stale index) yield empty strings.
    #[must_use]
    pub fn texts<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.spans
            .iter()
            .map(|s| text.get(s.start..s.end).unwrap_or_default())
            .collect()
    }
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i.min(text.len())
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    text[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(text.len(), |(i, _)| from + i)
}

/// Where a chunk starting at `start` and limited to `limit` should end
fn break_point(text: &str, start: usize, limit: usize, max: usize) -> usize {
    let window = &text[start..limit];
    if let Some(p) = window.rfind("\n\n") {
        if p >= max / 2 {
            return start + p;
        }
    }
    match window.rfind(char::is_whitespace) {
        Some(p) if p > 0 => start + p,
        _ => limit,
    }
}

fn split(text: &str, params: ChunkParams) -> Vec<(usize, usize)> {
    let max = params.max_chars.max(1);
    let mut spans = Vec::new();
    let mut start = skip_whitespace(text, 0);

    while start < text.len() {
        let mut limit = floor_boundary(text, start + max);
        if limit <= start {
            limit = ceil_boundary(text, start + 1);
        }
        let end = if limit == text.len() {
            limit
        } else {
            break_point(text, start, limit, max)
        };
        let trimmed = start + text[start..end].trim_end().len();
        spans.push((start, trimmed));

        let rest = skip_whitespace(text, end);
        if rest >= text.len() {
            break;
        }

        let mut next = end;
        if params.overlap > 0 && end - start > params.overlap {
            let from = ceil_boundary(text, end - params.overlap);
            if let Some(ws) = text[from..end].find(char::is_whitespace) {
                next = from + ws;
            }
        }
        let next = skip_whitespace(text, next);
        start = if next > start { next } else { rest };
    }
    spans
}
