//! Cross-suite imports.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

/// How an import location is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    /// A version-control repository checked out at the pinned revision.
    Git,
    /// A prebuilt snapshot archive named `<name>-<revision>.tar.gz`.
    Binary,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Git => "git",
            ImportKind::Binary => "binary",
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "git" => Ok(ImportKind::Git),
            "binary" => Ok(ImportKind::Binary),
            _ => bail!("unknown import kind `{}` (expected `git` or `binary`)", s),
        }
    }
}

/// One place an imported suite can be obtained from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportLocation {
    pub url: String,
    pub kind: ImportKind,
}

/// A pinned reference to another suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteImport {
    pub name: String,
    pub revision: String,
    /// Fallback locations, tried in order.
    pub locations: Vec<ImportLocation>,
}

impl SuiteImport {
    /// Whether `actual` satisfies the pinned revision.
    ///
    /// Pins may be abbreviated commit ids, so a prefix match is enough.
    pub fn accepts(&self, actual: &str) -> bool {
        !self.revision.is_empty() && actual.starts_with(&self.revision)
    }
}
