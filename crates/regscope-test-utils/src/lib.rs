//! Testing utilities for the regscope workspace
//!
//! In-memory stand-ins for the three external collaborators plus small
//! fixture builders.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

mod capability;
mod provider;
mod register;

pub use capability::FakeCapability;
pub use provider::FakeStructureProvider;
pub use register::FakeRegister;

use chrono::NaiveDate;
use regscope_core::{CodeNode, DocumentId, NodeKind, PartRef, SnapshotDate};
use regscope_snapshot::{CitationSite, Division, RegisterListing};
use regscope_workspace::AgencyInfo;

pub fn doc_id(raw: &str) -> DocumentId {
    DocumentId::parse(raw).unwrap()
}

pub fn snapshot_date(raw: &str) -> SnapshotDate {
    raw.parse().unwrap()
}

/// Title node holding `children`
pub fn title(number: u16, children: Vec<CodeNode>) -> CodeNode {
    CodeNode::branch(NodeKind::Title, number.to_string(), children)
}

pub fn chapter(identifier: &str, children: Vec<CodeNode>) -> CodeNode {
    CodeNode::branch(NodeKind::Chapter, identifier, children)
}

/// Part with a single section carrying all of its words
pub fn part(identifier: &str, words: u64) -> CodeNode {
    CodeNode::branch(
        NodeKind::Part,
        identifier,
        vec![CodeNode::leaf(
            NodeKind::Section,
            format!("{identifier}.1"),
            words,
        )],
    )
}

pub fn reserved_part(identifier: &str) -> CodeNode {
    CodeNode::leaf(NodeKind::Part, identifier, 0).reserved()
}

/// Listing for `doc` published at `volume FR start`..`end`
pub fn listing(doc: &str, volume: u32, start: u32, end: u32, published: (i32, u32, u32)) -> RegisterListing {
    RegisterListing {
        document_number: doc_id(doc),
        citation: Some(format!("{volume} FR {start}")),
        start_page: Some(start),
        end_page: Some(end),
        publication_date: NaiveDate::from_ymd_opt(published.0, published.1, published.2).unwrap(),
        title: format!("Final rule {doc}"),
        abstract_text: format!("Abstract of {doc}."),
        agency_names: vec!["Environmental Protection Agency".to_string()],
        significant: false,
        cfr_references: Vec::new(),
    }
}

/// Listing that also names the parts it affects
pub fn listing_for(
    doc: &str,
    volume: u32,
    start: u32,
    end: u32,
    published: (i32, u32, u32),
    parts: &[PartRef],
) -> RegisterListing {
    RegisterListing {
        cfr_references: parts.to_vec(),
        ..listing(doc, volume, start, end, published)
    }
}

/// Source note in section `name`
pub fn site(name: &str, text: &str) -> CitationSite {
    CitationSite {
        division: Division::new(name, "SECTION"),
        text: text.to_string(),
    }
}

pub fn epa() -> AgencyInfo {
    AgencyInfo {
        name: "Environmental Protection Agency".to_string(),
        short_name: "EPA".to_string(),
    }
}

/// Rule text whose comment section challenges the agency's authority
pub fn challenged_rule_text(doc: &str) -> String {
    format!(
        "Final rule {doc}. This rule establishes tolerances for residues of a pesticide.\n\n\
         Background. The agency received petitions and reviewed toxicology data over several years.\n\n\
         Comments and responses. One commenter asserted that EPA lacks statutory authority to issue this rule. \
         EPA disagrees and explains the basis in the Act.\n\n\
         Effective date. This rule is effective on publication."
    )
}

/// Rule text with no discussion of authority at all
pub fn routine_rule_text(doc: &str) -> String {
    format!(
        "Final rule {doc}. This rule corrects a typographical error in a table.\n\n\
         No comments were received on the proposal.\n\n\
         Effective date. This rule is effective on publication."
    )
}
