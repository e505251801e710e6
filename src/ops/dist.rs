//! Distribution assembly for the CLI and the build pipeline.

use std::collections::HashMap;

use anyhow::Result;
use petgraph::graph::NodeIndex;

use crate::core::node::NodeKind;
use crate::resolver::{assemble, Assembly, ResolvedGraph};
use crate::util::config::RunConfig;

/// Assemble the distribution labelled `name`.
pub fn assemble_distribution(graph: &ResolvedGraph, name: &str, run: &RunConfig) -> Result<Assembly> {
    Ok(assemble(graph, name, &run.output_dir)?)
}

/// Assemble every distribution among `nodes`.
///
/// Exclusion errors surface here, before anything is built.
pub fn assemble_all(
    graph: &ResolvedGraph,
    nodes: &[NodeIndex],
    run: &RunConfig,
) -> Result<HashMap<NodeIndex, Assembly>> {
    nodes
        .iter()
        .filter(|n| graph.node(**n).kind() == NodeKind::Distribution)
        .map(|n| Ok((*n, assemble_distribution(graph, &graph.node(*n).label, run)?)))
        .collect()
}

/// Human-readable listing of an assembly.
pub fn format_assembly(assembly: &Assembly) -> String {
    let mut out = format!("{} -> {}\n", assembly.name, assembly.output_path.display());
    for artifact in &assembly.artifacts {
        match &artifact.contributed_by {
            Some(dist) => out.push_str(&format!(
                "  {} ({}, via {})\n",
                artifact.label, artifact.kind, dist
            )),
            None => out.push_str(&format!("  {} ({})\n", artifact.label, artifact.kind)),
        }
    }
    if !assembly.distribution_dependencies.is_empty() {
        out.push_str(&format!(
            "depends on: {}\n",
            assembly.distribution_dependencies.join(", ")
        ));
    }
    if !assembly.publication_exclude.is_empty() {
        out.push_str(&format!(
            "not published: {}\n",
            assembly.publication_exclude.join(", ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::GraphError;
    use crate::test_support::resolved;
    use std::path::{Path, PathBuf};

    const SUITE: &str = r#"
name = "demo"
[libraries.L1]
path = "l1.jar"
[libraries.L2]
path = "l2.jar"
[projects.P1]
dependencies = ["L1", "L2"]
[projects.P2]
[distributions.CORE]
dependencies = ["P1"]
exclude = ["L2"]
[distributions.TOOLS]
dependencies = ["P2"]
dist-dependencies = ["CORE"]
"#;

    fn run() -> RunConfig {
        RunConfig::for_suite(Path::new("/work/demo"), PathBuf::from("/cache"))
    }

    #[test]
    fn test_assemble_all_covers_distributions_only() {
        let graph = resolved(SUITE);
        let all = graph.order().to_vec();
        let assemblies = assemble_all(&graph, &all, &run()).unwrap();
        assert_eq!(assemblies.len(), 2);

        let core = &assemblies[&graph.find("CORE").unwrap()];
        assert_eq!(core.artifact_labels(), vec!["L1", "P1"]);
        assert!(core.distribution_dependencies.is_empty());
    }

    #[test]
    fn test_unknown_distribution() {
        let graph = resolved(SUITE);
        let err = assemble_distribution(&graph, "MISSING", &run()).unwrap_err();
        match err.downcast_ref::<GraphError>() {
            Some(GraphError::UnknownDistribution { available, .. }) => {
                assert_eq!(available, &vec!["CORE".to_string(), "TOOLS".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_format_assembly() {
        let graph = resolved(SUITE);
        let tools = assemble_distribution(&graph, "TOOLS", &run()).unwrap();
        let text = format_assembly(&tools);
        assert!(text.starts_with("TOOLS -> "));
        assert!(text.contains("depends on: CORE"));
        assert!(text.contains("  P1 (project, via CORE)"));
        assert_eq!(tools.artifact_labels(), vec!["L1", "P1", "P2"]);
    }
}
