//! Core type definitions with validation.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The value was not a `P<project>R<run>C<clone>G<gen>` tag.
    #[error("invalid protein tag: {value}")]
    InvalidTag { value: String },

    /// A numeric component did not fit.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
}

/// Pre-compiled regex for `P2677R14C69G39` style protein tags.
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^P(\d+)R(\d+)C(\d+)G(\d+)$").unwrap());

/// Identity of one work assignment: `(project, run, clone, gen)`.
///
/// A fingerprint with all four components zero is "unknown". Unknown
/// fingerprints never [`match`](Self::matches) anything, including another
/// unknown fingerprint. Use `==` only for structural comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Fingerprint {
    pub project_id: u32,
    pub run: u32,
    pub clone: u32,
    pub generation: u32,
}

impl Fingerprint {
    /// The unknown fingerprint.
    pub const UNKNOWN: Self = Self::new(0, 0, 0, 0);

    #[must_use]
    pub const fn new(project_id: u32, run: u32, clone: u32, generation: u32) -> Self {
        Self {
            project_id,
            run,
            clone,
            generation,
        }
    }

    /// True unless all four components are zero.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.project_id != 0 || self.run != 0 || self.clone != 0 || self.generation != 0
    }

    /// True iff both fingerprints are known and every component is equal.
    #[must_use]
    pub const fn matches(&self, other: &Self) -> bool {
        self.is_known()
            && other.is_known()
            && self.project_id == other.project_id
            && self.run == other.run
            && self.clone == other.clone
            && self.generation == other.generation
    }

    /// Formats as a compact protein tag (`P2677R14C69G39`).
    #[must_use]
    pub fn tag(&self) -> String {
        format!(
            "P{}R{}C{}G{}",
            self.project_id, self.run, self.clone, self.generation
        )
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P{} (R{}, C{}, G{})",
            self.project_id, self.run, self.clone, self.generation
        )
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = ValidationError;

    /// Parses a protein tag such as `P2677R14C69G39`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValidationError::Empty {
                field: "protein tag",
            });
        }
        let caps = TAG_RE
            .captures(s)
            .ok_or_else(|| ValidationError::InvalidTag {
                value: s.to_string(),
            })?;
        let component = |i: usize, field: &'static str| {
            caps[i].parse::<u32>().map_err(|_| ValidationError::OutOfRange {
                field,
                value: caps[i].to_string(),
            })
        };
        Ok(Self::new(
            component(1, "project")?,
            component(2, "run")?,
            component(3, "clone")?,
            component(4, "gen")?,
        ))
    }
}
