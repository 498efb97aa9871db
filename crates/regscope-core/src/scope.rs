//! Requested scope of a pipeline run

use crate::error::CoreError;
use crate::ids::{validate_title, PartRef};
use crate::structure::NodeKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A requested slice of the code
///
/// Text form: `all`, `title:40`, `part:40/180`, `chapter:40/I`,
/// `subchapter:40/E` (any division kind followed by `title/identifier`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    All,
    Title { title: u16 },
    Part { part: PartRef },
    Division {
        title: u16,
        division: NodeKind,
        identifier: String,
    },
}

impl Scope {
    /// Scope of one title
    #[inline]
    #[must_use]
    pub fn title(title: u16) -> Self {
        Self::Title { title }
    }

    /// Scope of one part
    #[inline]
    #[must_use]
    pub fn part(title: u16, part: impl Into<String>) -> Self {
        Self::Part {
            part: PartRef::new(title, part),
        }
    }

    /// Title this scope is confined to, if any
    #[must_use]
    pub fn title_number(&self) -> Option<u16> {
        match self {
            Self::All => None,
            Self::Title { title } | Self::Division { title, .. } => Some(*title),
            Self::Part { part } => Some(part.title),
        }
    }

    /// Reject scopes that can never resolve, before touching any snapshot
    ///
    /// # Errors
    /// Returns [`CoreError`] for invalid or reserved titles and empty
    /// identifiers.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(title) = self.title_number() {
            validate_title(title)?;
        }
        match self {
            Self::Part { part } if part.part.is_empty() => {
                Err(CoreError::InvalidScope("empty part identifier".to_string()))
            }
            Self::Division { identifier, .. } if identifier.trim().is_empty() => {
                Err(CoreError::InvalidScope("empty division identifier".to_string()))
            }
            Self::Division {
                division: NodeKind::Section,
                ..
            } => Err(CoreError::InvalidScope(
                "sections are below part granularity".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Title { title } => write!(f, "title:{title}"),
            Self::Part { part } => write!(f, "part:{}", part.key()),
            Self::Division {
                title,
                division,
                identifier,
            } => write!(f, "{division}:{title}/{identifier}"),
        }
    }
}

impl FromStr for Scope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidScope(s.to_string()))?;
        let kind: NodeKind = kind.parse()?;
        match kind {
            NodeKind::Title => rest
                .trim()
                .parse()
                .map(Self::title)
                .map_err(|_| CoreError::InvalidScope(s.to_string())),
            NodeKind::Part => Ok(Self::Part { part: rest.parse()? }),
            division => {
                let (title, identifier) = rest
                    .split_once('/')
                    .ok_or_else(|| CoreError::InvalidScope(s.to_string()))?;
                let title = title
                    .trim()
                    .parse()
                    .map_err(|_| CoreError::InvalidScope(s.to_string()))?;
                Ok(Self::Division {
                    title,
                    division,
                    identifier: identifier.trim().to_string(),
                })
            }
        }
    }
}
