//! Graph resolution.
//!
//! This module turns a loaded suite into the immutable graph a build runs
//! against: references become edges, the graph is sorted, and platform
//! variants are selected. Distribution assembly queries the result. All
//! I/O (loading imported suites) happens through the [`SuiteProvider`]
//! while the graph is built; everything after that is pure.

pub mod distribution;
pub mod errors;
pub mod graph;
pub mod order;
pub mod platform;

pub use distribution::{assemble, Artifact, Assembly};
pub use errors::GraphError;
pub use graph::{GraphNode, SuiteGraph};
pub use platform::{ResolvedGraph, ResolvedNode};

use crate::core::platform::Platform;
use crate::core::suite::Suite;
use crate::sources::import::SuiteProvider;

/// Build, sort and platform-resolve the graph of `suite`.
pub fn resolve(
    suite: &Suite,
    provider: &dyn SuiteProvider,
    platform: &Platform,
) -> Result<ResolvedGraph, GraphError> {
    let graph = SuiteGraph::build(suite, provider)?;
    let order = order::sort(&graph)?;
    ResolvedGraph::resolve(&graph, &order, platform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{suite, StaticSuites};

    #[test]
    fn test_resolve_pipeline() {
        let manifest = suite(
            r#"
name = "demo"
[libraries.L1]
path = "l1.jar"
[libraries.L2]
path = "l2.jar"
[projects.P1]
dependencies = ["L1", "L2"]
[distributions.D]
dependencies = ["P1"]
exclude = ["L2"]
"#,
        );
        let graph = resolve(&manifest, &StaticSuites::new(), &Platform::new("linux", "amd64")).unwrap();
        let order: Vec<&str> = graph.order().iter().map(|n| graph.node(*n).label.as_str()).collect();
        assert_eq!(order, vec!["L1", "L2", "P1", "D"]);

        let assembly = assemble(&graph, "D", std::path::Path::new("/out")).unwrap();
        assert_eq!(assembly.artifact_labels(), vec!["L1", "P1"]);
    }
}
