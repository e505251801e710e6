//! Dependency references between suite entries.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

/// A possibly suite-qualified entry name, written `NAME` or `suite:NAME`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefName {
    suite: Option<String>,
    name: String,
}

impl RefName {
    /// A reference to an entry of the referring suite.
    pub fn local(name: impl Into<String>) -> Self {
        RefName {
            suite: None,
            name: name.into(),
        }
    }

    /// A reference to an entry of another suite.
    pub fn qualified(suite: impl Into<String>, name: impl Into<String>) -> Self {
        RefName {
            suite: Some(suite.into()),
            name: name.into(),
        }
    }

    /// The suite qualifier, if any.
    pub fn suite(&self) -> Option<&str> {
        self.suite.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this names an entry in a suite other than `owner`.
    pub fn is_cross_suite(&self, owner: &str) -> bool {
        self.suite.as_deref().is_some_and(|s| s != owner)
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.suite {
            Some(suite) => write!(f, "{}:{}", suite, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for RefName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once(':') {
            Some((suite, name)) => {
                if suite.is_empty() || name.is_empty() || name.contains(':') {
                    bail!("invalid reference `{}` (expected `NAME` or `suite:NAME`)", s);
                }
                Ok(RefName::qualified(suite, name))
            }
            None if s.is_empty() => bail!("empty reference"),
            None => Ok(RefName::local(s)),
        }
    }
}

/// How a dependency edge is used by the build.
///
/// Variants are ordered by strength: when one entry references the same
/// target several times, the strongest kind is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DepKind {
    /// Ordinary build-before relationship.
    Plain,
    /// Annotation processor that must be built and run before compiling.
    Processor,
    /// Producer whose generated output is an extra source root of the consumer.
    Generated,
    /// Project or library packaged by a distribution.
    Member,
    /// Another distribution this distribution is staged on.
    Distribution,
}

impl DepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepKind::Plain => "plain",
            DepKind::Processor => "processor",
            DepKind::Generated => "generated",
            DepKind::Member => "member",
            DepKind::Distribution => "distribution",
        }
    }

    /// Whether the producer's output becomes an input root of the consumer.
    pub fn is_generated(&self) -> bool {
        matches!(self, DepKind::Generated)
    }
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed reference from one entry to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyRef {
    target: RefName,
    kind: DepKind,
}

impl DependencyRef {
    pub fn new(target: RefName, kind: DepKind) -> Self {
        DependencyRef { target, kind }
    }

    /// Parse a manifest reference string.
    pub fn parse(s: &str, kind: DepKind) -> Result<Self> {
        Ok(DependencyRef::new(s.parse()?, kind))
    }

    pub fn target(&self) -> &RefName {
        &self.target
    }

    pub fn kind(&self) -> DepKind {
        self.kind
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.target, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_and_qualified() {
        let local: RefName = "ANTLR-3.5".parse().unwrap();
        assert_eq!(local.suite(), None);
        assert_eq!(local.name(), "ANTLR-3.5");

        let qualified: RefName = "truffle:TRUFFLE_API".parse().unwrap();
        assert_eq!(qualified.suite(), Some("truffle"));
        assert_eq!(qualified.name(), "TRUFFLE_API");
        assert_eq!(qualified.to_string(), "truffle:TRUFFLE_API");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<RefName>().is_err());
        assert!(":X".parse::<RefName>().is_err());
        assert!("a:".parse::<RefName>().is_err());
        assert!("a:b:c".parse::<RefName>().is_err());
    }

    #[test]
    fn test_cross_suite() {
        let r: RefName = "truffle:JLINE".parse().unwrap();
        assert!(r.is_cross_suite("fastr"));
        assert!(!r.is_cross_suite("truffle"));
        assert!(!RefName::local("X").is_cross_suite("fastr"));
    }

    #[test]
    fn test_kind_strength_order() {
        assert!(DepKind::Generated > DepKind::Processor);
        assert!(DepKind::Processor > DepKind::Plain);
    }
}
