//! Distribution assembly.
//!
//! A distribution packages the closure of its members over plain and
//! generated edges into projects and libraries. Excluded entries are cut
//! out of the closure together with whatever only they pulled in; the
//! artifacts of the distributions it depends on are then added unless
//! excluded. Everything comes back in build order.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::graph::NodeIndex;
use serde::Serialize;

use crate::core::dependency::{DepKind, RefName};
use crate::core::node::{Distribution, NodeKind};
use crate::resolver::errors::GraphError;
use crate::resolver::platform::ResolvedGraph;

/// One packaged entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub label: String,
    pub kind: NodeKind,
    /// Distribution dependency the artifact was inherited from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contributed_by: Option<String>,
}

/// The assembled content of a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assembly {
    pub name: String,
    pub artifacts: Vec<Artifact>,
    /// Direct distribution dependencies, in declaration order.
    pub distribution_dependencies: Vec<String>,
    pub output_path: PathBuf,
    /// Entries left out of publication metadata.
    pub publication_exclude: Vec<String>,
    pub publish: bool,
}

impl Assembly {
    pub fn artifact_labels(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.label.as_str()).collect()
    }
}

/// Assemble the distribution labelled `name`.
pub fn assemble(graph: &ResolvedGraph, name: &str, output_dir: &Path) -> Result<Assembly, GraphError> {
    let index = graph
        .find(name)
        .filter(|i| graph.node(*i).kind() == NodeKind::Distribution)
        .ok_or_else(|| GraphError::UnknownDistribution {
            name: name.to_string(),
            available: graph.distributions().into_iter().map(str::to_string).collect(),
        })?;

    let mut assembler = Assembler {
        graph,
        output_dir,
        done: HashMap::new(),
        active: HashSet::new(),
    };
    assembler.assemble(index)
}

struct Assembler<'a> {
    graph: &'a ResolvedGraph,
    output_dir: &'a Path,
    done: HashMap<NodeIndex, Assembly>,
    active: HashSet<NodeIndex>,
}

impl Assembler<'_> {
    fn assemble(&mut self, index: NodeIndex) -> Result<Assembly, GraphError> {
        if let Some(assembly) = self.done.get(&index) {
            return Ok(assembly.clone());
        }
        // Distribution cycles are rejected by the sorter before we get here.
        self.active.insert(index);

        let graph = self.graph;
        let node = graph.node(index);
        let Some(dist) = node.node.as_distribution() else {
            return Err(GraphError::UnknownDistribution {
                name: node.label.clone(),
                available: graph.distributions().into_iter().map(str::to_string).collect(),
            });
        };

        let members = self.edges(index, DepKind::Member);
        let full = self.closure(&members, &HashSet::new());

        let excluded: HashSet<NodeIndex> = self
            .validate(index, dist, &dist.exclude, &full)?
            .into_iter()
            .collect();
        let publication_exclude = self.validate(index, dist, &dist.publication_exclude, &full)?;

        let mut packaged: Vec<Artifact> = self
            .closure(&members, &excluded)
            .into_iter()
            .map(|n| Artifact {
                label: graph.node(n).label.clone(),
                kind: graph.node(n).kind(),
                contributed_by: None,
            })
            .collect();

        let dist_dependencies = self.edges(index, DepKind::Distribution);
        for dep in &dist_dependencies {
            if self.active.contains(dep) {
                continue;
            }
            let inherited = self.assemble(*dep)?;
            for artifact in inherited.artifacts {
                let excluded_here = graph.find(&artifact.label).is_some_and(|n| excluded.contains(&n));
                if excluded_here || packaged.iter().any(|a| a.label == artifact.label) {
                    continue;
                }
                packaged.push(Artifact {
                    contributed_by: Some(inherited.name.clone()),
                    ..artifact
                });
            }
        }

        packaged.sort_by_key(|a| graph.find(&a.label).map(|n| graph.position(n)));

        let assembly = Assembly {
            name: node.label.clone(),
            artifacts: packaged,
            distribution_dependencies: dist_dependencies
                .iter()
                .map(|d| graph.node(*d).label.clone())
                .collect(),
            output_path: self.output_path(index),
            publication_exclude: publication_exclude
                .iter()
                .map(|n| graph.node(*n).label.clone())
                .collect(),
            publish: dist.publish,
        };

        tracing::debug!(
            "Assembled `{}` with {} artifact(s)",
            assembly.name,
            assembly.artifacts.len()
        );
        self.active.remove(&index);
        self.done.insert(index, assembly.clone());
        Ok(assembly)
    }

    /// Direct edges of `kind` out of `index`.
    fn edges(&self, index: NodeIndex, kind: DepKind) -> Vec<NodeIndex> {
        self.graph
            .dependencies(index)
            .into_iter()
            .filter(|(_, k)| *k == kind)
            .map(|(n, _)| n)
            .collect()
    }

    /// Projects and libraries reachable from `members` over plain and
    /// generated edges, never entering `excluded`. In build order.
    fn closure(&self, members: &[NodeIndex], excluded: &HashSet<NodeIndex>) -> Vec<NodeIndex> {
        let packageable = |n: NodeIndex| {
            matches!(
                self.graph.node(n).kind(),
                NodeKind::Project | NodeKind::Library
            ) && !excluded.contains(&n)
        };

        let mut seen = HashSet::new();
        let mut stack: Vec<NodeIndex> = members.iter().copied().filter(|n| packageable(*n)).collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            for (dep, kind) in self.graph.dependencies(node) {
                if matches!(kind, DepKind::Plain | DepKind::Generated) && packageable(dep) {
                    stack.push(dep);
                }
            }
        }

        let mut nodes: Vec<_> = seen.into_iter().collect();
        nodes.sort_by_key(|n| self.graph.position(*n));
        nodes
    }

    /// Every name in `names` must be part of the unmodified closure.
    fn validate(
        &self,
        index: NodeIndex,
        dist: &Distribution,
        names: &[RefName],
        closure: &[NodeIndex],
    ) -> Result<Vec<NodeIndex>, GraphError> {
        let mut resolved = Vec::new();
        for name in names {
            match self.graph.resolve_ref(index, name) {
                Some(n) if closure.contains(&n) => {
                    if !resolved.contains(&n) {
                        resolved.push(n);
                    }
                }
                _ => {
                    return Err(GraphError::InvalidExclusion {
                        distribution: dist.name.clone(),
                        name: name.to_string(),
                    })
                }
            }
        }
        Ok(resolved)
    }

    fn output_path(&self, index: NodeIndex) -> PathBuf {
        let node = self.graph.node(index);
        match &node.output {
            Some(path) => node.suite_dir.join(path),
            None => self
                .output_dir
                .join("dists")
                .join(slug(&node.label)),
        }
    }
}

/// File-system friendly form of a distribution label.
fn slug(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            ':' | '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::Platform;
    use crate::resolver::graph::SuiteGraph;
    use crate::resolver::order::sort;
    use crate::test_support::{suite, StaticSuites};

    fn resolved(manifest: &str) -> ResolvedGraph {
        let graph = SuiteGraph::build(&suite(manifest), &StaticSuites::new()).unwrap();
        let order = sort(&graph).unwrap();
        ResolvedGraph::resolve(&graph, &order, &Platform::new("linux", "amd64")).unwrap()
    }

    const SUITE: &str = r#"
name = "demo"
[libraries.L1]
path = "l1.jar"
[libraries.L2]
path = "l2.jar"
[libraries.L3]
path = "l3.jar"
[projects.P1]
dependencies = ["L1", "L2"]
[projects.P2]
dependencies = ["P1", "L3"]
[projects.Proc]
dependencies = ["L3"]
[projects.P3]
annotation-processors = ["Proc"]
[distributions.D]
dependencies = ["P1"]
exclude = ["L2"]
[distributions.E]
dependencies = ["P2"]
exclude = ["L1"]
dist-dependencies = ["D"]
path = "dists/e.jar"
maven-exclude = ["L3"]
"#;

    #[test]
    fn test_exclusion_is_removed_from_closure() {
        let graph = resolved(SUITE);
        let assembly = assemble(&graph, "D", Path::new("/out")).unwrap();
        assert_eq!(assembly.artifact_labels(), vec!["L1", "P1"]);
        assert!(assembly.distribution_dependencies.is_empty());
        assert_eq!(assembly.output_path, PathBuf::from("/out/dists/d"));
        assert!(assembly.publish);
    }

    #[test]
    fn test_dist_dependency_contributes_artifacts() {
        let graph = resolved(SUITE);
        let assembly = assemble(&graph, "E", Path::new("/out")).unwrap();

        // L1 is excluded here, so D cannot bring it back.
        assert_eq!(assembly.artifact_labels(), vec!["L2", "L3", "P1", "P2"]);
        assert_eq!(assembly.distribution_dependencies, vec!["D"]);
        assert_eq!(assembly.publication_exclude, vec!["L3"]);
        assert_eq!(assembly.output_path, PathBuf::from("/work/demo/dists/e.jar"));
        assert!(assembly.artifacts.iter().all(|a| a.contributed_by.is_none()));
    }

    #[test]
    fn test_inherited_artifacts_are_marked() {
        let graph = resolved(
            r#"
name = "demo"
[libraries.L]
path = "l.jar"
[projects.Api]
dependencies = ["L"]
[projects.Impl]
[distributions.API]
dependencies = ["Api"]
[distributions.IMPL]
dependencies = ["Impl"]
dist-dependencies = ["API"]
"#,
        );
        let assembly = assemble(&graph, "IMPL", Path::new("/out")).unwrap();
        assert_eq!(assembly.artifact_labels(), vec!["L", "Api", "Impl"]);
        assert_eq!(assembly.artifacts[0].contributed_by.as_deref(), Some("API"));
        assert_eq!(assembly.artifacts[2].contributed_by, None);
    }

    #[test]
    fn test_processor_edges_are_not_packaged() {
        let graph = resolved(&format!(
            "{}\n[distributions.F]\ndependencies = [\"P3\"]\n",
            SUITE
        ));
        let assembly = assemble(&graph, "F", Path::new("/out")).unwrap();
        assert_eq!(assembly.artifact_labels(), vec!["P3"]);
    }

    #[test]
    fn test_exclusion_outside_closure() {
        let graph = resolved(&format!(
            "{}\n[distributions.G]\ndependencies = [\"P1\"]\nexclude = [\"L3\"]\n",
            SUITE
        ));
        let err = assemble(&graph, "G", Path::new("/out")).unwrap_err();
        assert_eq!(
            err,
            GraphError::InvalidExclusion {
                distribution: "G".to_string(),
                name: "L3".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_distribution() {
        let graph = resolved(SUITE);
        match assemble(&graph, "P1", Path::new("/out")).unwrap_err() {
            GraphError::UnknownDistribution { name, available } => {
                assert_eq!(name, "P1");
                assert_eq!(available, vec!["D", "E"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
