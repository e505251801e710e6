//! Terminal status of every node of a build, and of the run as a whole.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::core::node::NodeKind;

/// Exit code for any error not covered below.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when resolution failed before any node was built.
pub const EXIT_RESOLVE_ERROR: i32 = 2;

/// How a node's build ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NodeStatus {
    Built { artifact: PathBuf },
    Failed { message: String },
    /// Not attempted. `cause` is the failed dependency, or `cancelled`.
    Skipped { cause: String },
    /// Running when the build was cancelled.
    Interrupted,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Built { .. } => "built",
            NodeStatus::Failed { .. } => "failed",
            NodeStatus::Skipped { .. } => "skipped",
            NodeStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self, NodeStatus::Built { .. })
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub label: String,
    pub kind: NodeKind,
    #[serde(flatten)]
    pub status: NodeStatus,
}

/// Pass/fail determination of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    PartialFailure,
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::PartialFailure => 3,
            RunOutcome::Interrupted => 4,
        }
    }
}

/// Every node's terminal status, in build order.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub nodes: Vec<NodeReport>,
    pub interrupted: bool,
    pub duration: Duration,
}

impl BuildReport {
    pub fn status(&self, label: &str) -> Option<&NodeStatus> {
        self.nodes
            .iter()
            .find(|n| n.label == label)
            .map(|n| &n.status)
    }

    fn count(&self, status: &str) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status.as_str() == status)
            .count()
    }

    pub fn built(&self) -> usize {
        self.count("built")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.interrupted {
            RunOutcome::Interrupted
        } else if self.nodes.iter().all(|n| n.status.is_built()) {
            RunOutcome::Success
        } else {
            RunOutcome::PartialFailure
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == RunOutcome::Success
    }

    /// Human-readable report: one line per node that did not build, then a
    /// summary.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let line = match &node.status {
                NodeStatus::Built { artifact } if verbose => {
                    format!("{:>12} {} ({})", "Built", node.label, artifact.display())
                }
                NodeStatus::Built { .. } => continue,
                NodeStatus::Failed { message } => {
                    format!("{:>12} {}: {}", "Failed", node.label, message)
                }
                NodeStatus::Skipped { cause } => {
                    format!("{:>12} {} ({})", "Skipped", node.label, cause)
                }
                NodeStatus::Interrupted => format!("{:>12} {}", "Interrupted", node.label),
            };
            out.push_str(&line);
            out.push('\n');
        }

        let verdict = match self.outcome() {
            RunOutcome::Success => "Finished",
            RunOutcome::PartialFailure => "Failed",
            RunOutcome::Interrupted => "Interrupted",
        };
        out.push_str(&format!(
            "{:>12} {} built, {} failed, {} skipped in {:.2}s\n",
            verdict,
            self.built(),
            self.failed(),
            self.skipped(),
            self.duration.as_secs_f64()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(label: &str, status: NodeStatus) -> NodeReport {
        NodeReport {
            label: label.to_string(),
            kind: NodeKind::Project,
            status,
        }
    }

    #[test]
    fn test_outcome() {
        let mut report = BuildReport {
            nodes: vec![node("A", NodeStatus::Built { artifact: PathBuf::from("a") })],
            ..Default::default()
        };
        assert_eq!(report.outcome(), RunOutcome::Success);
        assert_eq!(report.outcome().exit_code(), 0);

        report.nodes.push(node("B", NodeStatus::Skipped { cause: "C".into() }));
        assert_eq!(report.outcome(), RunOutcome::PartialFailure);
        assert_eq!(report.outcome().exit_code(), 3);

        report.interrupted = true;
        assert_eq!(report.outcome().exit_code(), 4);
    }

    #[test]
    fn test_render_lists_unbuilt_nodes() {
        let report = BuildReport {
            nodes: vec![
                node("ProjA", NodeStatus::Skipped { cause: "ProjB".into() }),
                node("ProjB", NodeStatus::Failed { message: "exit status 1".into() }),
                node("ProjC", NodeStatus::Built { artifact: PathBuf::from("c") }),
            ],
            ..Default::default()
        };
        let text = report.render(false);
        assert!(text.contains("Skipped ProjA (ProjB)"));
        assert!(text.contains("Failed ProjB: exit status 1"));
        assert!(!text.contains("ProjC"));
        assert!(text.contains("1 built, 1 failed, 1 skipped"));
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_string(&node("A", NodeStatus::Interrupted)).unwrap();
        assert_eq!(json, r#"{"label":"A","kind":"project","status":"interrupted"}"#);
    }
}
