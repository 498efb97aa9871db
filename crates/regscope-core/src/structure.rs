//! Hierarchical code tree
//!
//! Titles contain chapters, subchapters, parts, subparts and sections.
//! Terminal nodes carry a word count; capture rolls the counts up so
//! every interior node reports the sum over its terminal descendants.

use crate::ids::PartRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Level of a node in the code hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Title,
    Chapter,
    Subchapter,
    Part,
    Subpart,
    Section,
}

impl NodeKind {
    /// Lowercase name as used in paths and scopes
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Chapter => "chapter",
            Self::Subchapter => "subchapter",
            Self::Part => "part",
            Self::Subpart => "subpart",
            Self::Section => "section",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(Self::Title),
            "chapter" => Ok(Self::Chapter),
            "subchapter" => Ok(Self::Subchapter),
            "part" => Ok(Self::Part),
            "subpart" => Ok(Self::Subpart),
            "section" => Ok(Self::Section),
            other => Err(crate::error::CoreError::InvalidScope(format!(
                "unknown division kind '{other}'"
            ))),
        }
    }
}

/// One node of the code tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeNode {
    pub kind: NodeKind,
    /// Path segment within the parent, e.g. `180` for a part
    pub identifier: String,
    /// Human-readable heading
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub reserved: bool,
    /// Defined on terminal nodes; filled on interior nodes by
    /// [`CodeNode::roll_up_word_counts`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u64>,
    #[serde(default)]
    pub children: Vec<CodeNode>,
}

impl CodeNode {
    /// Terminal node with a word count
    #[must_use]
    pub fn leaf(kind: NodeKind, identifier: impl Into<String>, word_count: u64) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            label: String::new(),
            reserved: false,
            word_count: Some(word_count),
            children: Vec::new(),
        }
    }

    /// Interior node
    #[must_use]
    pub fn branch(kind: NodeKind, identifier: impl Into<String>, children: Vec<CodeNode>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            label: String::new(),
            reserved: false,
            word_count: None,
            children,
        }
    }

    /// With heading
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Mark reserved
    #[must_use]
    pub fn reserved(mut self) -> Self {
        self.reserved = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }

    /// Sum of terminal word counts beneath (and including) this node
    #[must_use]
    pub fn total_words(&self) -> u64 {
        if self.is_terminal() {
            self.word_count.unwrap_or(0)
        } else {
            self.children.iter().map(CodeNode::total_words).sum()
        }
    }

    /// Fill `word_count` on every interior node from its terminals
    pub fn roll_up_word_counts(&mut self) -> u64 {
        if self.is_terminal() {
            let words = self.word_count.unwrap_or(0);
            self.word_count = Some(words);
            return words;
        }
        let total = self
            .children
            .iter_mut()
            .map(CodeNode::roll_up_word_counts)
            .sum();
        self.word_count = Some(total);
        total
    }

    /// Whether every defined interior count matches its terminals
    #[must_use]
    pub fn word_counts_consistent(&self) -> bool {
        if self.is_terminal() {
            return true;
        }
        let sum: u64 = self.children.iter().map(CodeNode::total_words).sum();
        self.word_count.map_or(true, |w| w == sum)
            && self.children.iter().all(CodeNode::word_counts_consistent)
    }

    /// Depth-first pre-order traversal with the ancestor path
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&[&'a CodeNode], &'a CodeNode)) {
        let mut path = Vec::new();
        self.walk_inner(&mut path, visit);
    }

    fn walk_inner<'a>(
        &'a self,
        path: &mut Vec<&'a CodeNode>,
        visit: &mut impl FnMut(&[&'a CodeNode], &'a CodeNode),
    ) {
        visit(path.as_slice(), self);
        path.push(self);
        for child in &self.children {
            child.walk_inner(path, visit);
        }
        path.pop();
    }

    /// First descendant (or self) of the given kind and identifier
    #[must_use]
    pub fn find(&self, kind: NodeKind, identifier: &str) -> Option<&CodeNode> {
        if self.kind == kind && self.identifier == identifier {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(kind, identifier))
    }

    /// All part nodes under this node, in document order
    #[must_use]
    pub fn parts(&self) -> Vec<&CodeNode> {
        let mut out = Vec::new();
        self.walk(&mut |_, node| {
            if node.kind == NodeKind::Part {
                out.push(node);
            }
        });
        out
    }
}

/// Path key of a node for prefix indexing, e.g.
/// `title-40/chapter-I/subchapter-E/part-180/`
#[must_use]
pub fn path_key(ancestors: &[&CodeNode], node: &CodeNode) -> String {
    let mut key = String::new();
    for n in ancestors.iter().copied().chain(std::iter::once(node)) {
        key.push_str(n.kind.as_str());
        key.push('-');
        key.push_str(&n.identifier);
        key.push('/');
    }
    key
}

/// Title number of a title node
#[must_use]
pub fn title_number(node: &CodeNode) -> Option<u16> {
    (node.kind == NodeKind::Title)
        .then(|| node.identifier.trim().parse().ok())
        .flatten()
}

/// Part reference for a part node under the given title
#[must_use]
pub fn part_ref(title: u16, node: &CodeNode) -> Option<PartRef> {
    (node.kind == NodeKind::Part).then(|| PartRef::new(title, node.identifier.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_title() -> CodeNode {
        CodeNode::branch(
            NodeKind::Title,
            "40",
            vec![CodeNode::branch(
                NodeKind::Chapter,
                "I",
                vec![
                    CodeNode::branch(
                        NodeKind::Part,
                        "180",
                        vec![
                            CodeNode::leaf(NodeKind::Section, "180.1", 120),
                            CodeNode::leaf(NodeKind::Section, "180.3", 80),
                        ],
                    ),
                    CodeNode::leaf(NodeKind::Part, "181", 0).reserved(),
                ],
            )],
        )
    }

    #[test]
    fn total_words_sums_terminals() {
        let title = sample_title();
        assert_eq!(title.total_words(), 200);
        assert_eq!(title.find(NodeKind::Part, "180").unwrap().total_words(), 200);
    }

    #[test]
    fn roll_up_fills_interior_counts() {
        let mut title = sample_title();
        assert_eq!(title.roll_up_word_counts(), 200);
        assert_eq!(title.word_count, Some(200));
        assert!(title.word_counts_consistent());
    }

    #[test]
    fn inconsistent_interior_count_detected() {
        let mut title = sample_title();
        title.roll_up_word_counts();
        title.children[0].word_count = Some(7);
        assert!(!title.word_counts_consistent());
    }

    #[test]
    fn parts_in_document_order() {
        let title = sample_title();
        let ids: Vec<_> = title.parts().iter().map(|p| p.identifier.clone()).collect();
        assert_eq!(ids, vec!["180", "181"]);
    }

    #[test]
    fn path_keys_nest() {
        let title = sample_title();
        let mut keys = Vec::new();
        title.walk(&mut |ancestors, node| keys.push(path_key(ancestors, node)));
        assert!(keys.contains(&"title-40/chapter-I/part-180/".to_string()));
        assert!(keys
            .iter()
            .filter(|k| k.starts_with("title-40/chapter-I/"))
            .count()
            >= 3);
    }

    #[test]
    fn kind_parse() {
        assert_eq!("Subchapter".parse::<NodeKind>().unwrap(), NodeKind::Subchapter);
        assert!("volume".parse::<NodeKind>().is_err());
    }

    fn arb_part() -> impl Strategy<Value = CodeNode> {
        prop::collection::vec(0u64..10_000, 0..8).prop_map(|counts| {
            let sections = counts
                .into_iter()
                .enumerate()
                .map(|(i, w)| CodeNode::leaf(NodeKind::Section, format!("1.{i}"), w))
                .collect::<Vec<_>>();
            if sections.is_empty() {
                CodeNode::leaf(NodeKind::Part, "1", 0)
            } else {
                CodeNode::branch(NodeKind::Part, "1", sections)
            }
        })
    }

    proptest! {
        #[test]
        fn rolled_up_counts_equal_terminal_sums(parts in prop::collection::vec(arb_part(), 1..5)) {
            let mut title = CodeNode::branch(NodeKind::Title, "1", parts);
            let expected: u64 = title.children.iter().map(CodeNode::total_words).sum();
            prop_assert_eq!(title.roll_up_word_counts(), expected);
            prop_assert!(title.word_counts_consistent());
            for part in title.parts() {
                prop_assert_eq!(part.word_count, Some(part.total_words()));
            }
        }
    }
}
