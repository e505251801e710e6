//! Graph construction error types and diagnostics.
//!
//! Every variant is fatal: the run stops before any node is scheduled.

use thiserror::Error;

use crate::core::manifest::ManifestError;
use crate::sources::import::ImportError;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error while building, ordering or resolving the node graph.
#[derive(Debug, Clone, PartialEq, Eq, Error, miette::Diagnostic)]
pub enum GraphError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Import(#[from] ImportError),

    #[error("`{from}` depends on `{target}`, which is not defined")]
    #[diagnostic(code(berth::graph::dangling))]
    DanglingReference { from: String, target: String },

    #[error("`{name}` is defined as both a {first} and a {second} in suite `{suite}`")]
    #[diagnostic(code(berth::graph::collision))]
    NameCollision {
        suite: String,
        name: String,
        first: String,
        second: String,
    },

    #[error("cycle detected: {}", cycle.join(" -> "))]
    #[diagnostic(code(berth::graph::cycle))]
    CycleDetected { cycle: Vec<String> },

    #[error("`{node}` has no variant for {platform}")]
    #[diagnostic(code(berth::graph::platform))]
    UnsupportedPlatform {
        node: String,
        platform: String,
        supported: Vec<String>,
    },

    #[error("distribution `{distribution}` excludes `{name}`, which is not in its closure")]
    #[diagnostic(code(berth::graph::exclusion))]
    InvalidExclusion { distribution: String, name: String },

    #[error("no distribution named `{name}`")]
    #[diagnostic(code(berth::graph::unknown_distribution))]
    UnknownDistribution { name: String, available: Vec<String> },
}

impl GraphError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            GraphError::Manifest(e) => e.to_diagnostic(),
            GraphError::Import(e) => e.to_diagnostic(),

            GraphError::DanglingReference { from, target } => {
                Diagnostic::error(format!("unresolved reference `{}`", target))
                    .with_context(format!("referenced by `{}`", from))
                    .with_suggestion(suggestions::CHECK_NAME)
                    .with_suggestion("Cross-suite references are written `suite:NAME`")
            }

            GraphError::NameCollision {
                suite,
                name,
                first,
                second,
            } => Diagnostic::error(format!("duplicate name `{}` in suite `{}`", name, suite))
                .with_context(format!("declared as a {}", first))
                .with_context(format!("declared again as a {}", second))
                .with_suggestion("Rename one of the entries"),

            GraphError::CycleDetected { cycle } => {
                Diagnostic::error("cycle detected in dependency graph")
                    .with_context(format!("cycle: {}", cycle.join(" -> ")))
                    .with_suggestion(
                        "Break the cycle by removing or restructuring dependencies",
                    )
            }

            GraphError::UnsupportedPlatform {
                node,
                platform,
                supported,
            } => {
                let mut diag =
                    Diagnostic::error(format!("`{}` cannot be built for {}", node, platform));
                if !supported.is_empty() {
                    diag = diag.with_context(format!("variants: {}", supported.join(", ")));
                }
                diag.with_suggestion(suggestions::ADD_VARIANT)
                    .with_suggestion("Select another target with `--os` and `--arch`")
            }

            GraphError::InvalidExclusion { distribution, name } => Diagnostic::error(format!(
                "invalid exclusion in distribution `{}`",
                distribution
            ))
            .with_context(format!(
                "`{}` is not a transitive dependency of any member",
                name
            ))
            .with_suggestion(format!("Remove `{}` from the exclusion list", name)),

            GraphError::UnknownDistribution { name, available } => {
                let mut diag =
                    Diagnostic::error(format!("could not find distribution `{}`", name));
                if !available.is_empty() {
                    diag = diag.with_context(format!("available: {}", available.join(", ")));
                }
                diag.with_suggestion(suggestions::CHECK_NAME)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = GraphError::CycleDetected {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "cycle detected: A -> B -> A");
        assert!(err.to_diagnostic().format(false).contains("cycle: A -> B -> A"));
    }

    #[test]
    fn test_unsupported_platform_diagnostic() {
        let err = GraphError::UnsupportedPlatform {
            node: "N".into(),
            platform: "solaris/sparcv9".into(),
            supported: vec!["darwin/amd64".into(), "linux/amd64".into()],
        };
        let text = err.to_diagnostic().format(false);
        assert!(text.contains("`N` cannot be built for solaris/sparcv9"));
        assert!(text.contains("darwin/amd64, linux/amd64"));
    }

    #[test]
    fn test_manifest_errors_pass_through() {
        let inner = ManifestError::MissingField {
            entry: "ANTLR".into(),
            field: "path".into(),
        };
        let err = GraphError::from(inner.clone());
        assert_eq!(err.to_string(), inner.to_string());
    }
}
