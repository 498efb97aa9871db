//! Identifiers shared across components
//!
//! Components reference each other's records by these ids only.

use crate::error::CoreError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Canonical register document number, e.g. `2024-12345`
///
/// Canonical form is trimmed and restricted to characters that are safe
/// as a single path segment, since the id doubles as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Canonicalize and validate a raw document number
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidDocumentId`] for empty ids or ids with
    /// characters outside `[A-Za-z0-9._-]`, or a leading dot.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && !trimmed.starts_with('.')
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(CoreError::InvalidDocumentId(raw.to_string()))
        }
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// Pipeline run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|_| CoreError::InvalidRunId(s.to_string()))
    }
}

/// Capture date of a structure snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotDate(NaiveDate);

impl SnapshotDate {
    /// Wrap a calendar date
    #[inline]
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Build from year, month, day
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidDate`] if the date does not exist
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, CoreError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))
    }

    /// Underlying date
    #[inline]
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for SnapshotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for SnapshotDate {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| CoreError::InvalidDate(s.to_string()))
    }
}

/// Title number range of the code; title 35 is wholly reserved
pub const TITLE_RANGE: std::ops::RangeInclusive<u16> = 1..=50;

/// Reserved title number
pub const RESERVED_TITLE: u16 = 35;

/// Check that a title number names an existing, non-reserved title
///
/// # Errors
/// Returns [`CoreError::InvalidTitle`] otherwise
pub fn validate_title(title: u16) -> Result<(), CoreError> {
    if !TITLE_RANGE.contains(&title) {
        return Err(CoreError::InvalidTitle {
            title,
            reason: "titles are numbered 1 through 50".to_string(),
        });
    }
    if title == RESERVED_TITLE {
        return Err(CoreError::InvalidTitle {
            title,
            reason: "title is fully reserved".to_string(),
        });
    }
    Ok(())
}

/// Address of one part: `(title, part identifier)`
///
/// Part identifiers are strings because some carry letters (`4a`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartRef {
    /// Title number
    pub title: u16,
    /// Part identifier within the title
    pub part: String,
}

impl PartRef {
    /// Create a part reference
    #[inline]
    #[must_use]
    pub fn new(title: u16, part: impl Into<String>) -> Self {
        Self {
            title,
            part: part.into().trim().to_string(),
        }
    }

    /// Compact key `title/part`, used in persisted tables
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.title, self.part)
    }

    /// Part number as understood by the document register
    ///
    /// The register files lettered parts (`4a`) under their numeric
    /// portion (`4`).
    #[must_use]
    pub fn register_part(&self) -> String {
        let digits: String = self.part.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            self.part.clone()
        } else {
            digits
        }
    }
}

impl fmt::Display for PartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} CFR Part {}", self.title, self.part)
    }
}

impl FromStr for PartRef {
    type Err = CoreError;

    /// Accepts `40/180`, `40:180` or `40 CFR 180`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (title, part) = s
            .split_once('/')
            .or_else(|| s.split_once(':'))
            .or_else(|| s.split_once(" CFR Part "))
            .or_else(|| s.split_once(" CFR "))
            .ok_or_else(|| CoreError::InvalidPart(s.to_string()))?;
        let title: u16 = title
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidPart(s.to_string()))?;
        let part = part.trim();
        if part.is_empty() {
            return Err(CoreError::InvalidPart(s.to_string()));
        }
        Ok(Self::new(title, part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_trimmed() {
        let id = DocumentId::parse("  2024-12345\n").unwrap();
        assert_eq!(id.as_str(), "2024-12345");
    }

    #[test]
    fn document_id_rejects_path_segments() {
        assert!(DocumentId::parse("").is_err());
        assert!(DocumentId::parse("../etc").is_err());
        assert!(DocumentId::parse("a/b").is_err());
        assert!(DocumentId::parse(".hidden").is_err());
        assert!(DocumentId::parse("E8-12345").is_ok());
    }

    #[test]
    fn document_id_serde_validates() {
        let ok: DocumentId = serde_json::from_str("\"94-27103\"").unwrap();
        assert_eq!(ok.as_str(), "94-27103");
        assert!(serde_json::from_str::<DocumentId>("\"a b\"").is_err());
    }

    #[test]
    fn run_id_parse_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<RunId>().is_err());
    }

    #[test]
    fn snapshot_date_format() {
        let date: SnapshotDate = "2024-12-30".parse().unwrap();
        assert_eq!(date.to_string(), "2024-12-30");
        assert_eq!(serde_json::to_string(&date).unwrap(), "\"2024-12-30\"");
        assert!(SnapshotDate::from_ymd(2024, 2, 30).is_err());
    }

    #[test]
    fn title_validation() {
        assert!(validate_title(40).is_ok());
        assert!(validate_title(0).is_err());
        assert!(validate_title(51).is_err());
        assert!(matches!(
            validate_title(35),
            Err(CoreError::InvalidTitle { title: 35, .. })
        ));
    }

    #[test]
    fn part_ref_parsing() {
        let a: PartRef = "40/180".parse().unwrap();
        let b: PartRef = "40 CFR 180".parse().unwrap();
        let c: PartRef = "40 CFR Part 180".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.key(), "40/180");
        assert!("forty/1".parse::<PartRef>().is_err());
        assert!("40/".parse::<PartRef>().is_err());
    }

    #[test]
    fn lettered_parts_use_numeric_register_part() {
        assert_eq!(PartRef::new(15, "4a").register_part(), "4");
        assert_eq!(PartRef::new(40, "180").register_part(), "180");
    }
}
