//! Platform variant selection.
//!
//! Every node with an `os-arch` table gets the variant for the active
//! platform. Project variants may add and remove dependencies, which can
//! invalidate the structural build order; when they do, only the window of
//! the order between the first affected dependent and the last affected
//! dependency is sorted again.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::core::dependency::{DepKind, RefName};
use crate::core::node::{LibrarySource, Node, NodeKind};
use crate::core::platform::Platform;
use crate::resolver::errors::GraphError;
use crate::resolver::graph::{ref_label, SuiteGraph};
use crate::resolver::order::dfs_order;

/// A node after variant selection.
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub label: String,
    pub suite: String,
    pub suite_dir: PathBuf,
    pub primary: bool,
    /// The node as declared.
    pub node: Node,
    /// Effective source, for libraries.
    pub library: Option<LibrarySource>,
    /// Effective project output directory or distribution path.
    pub output: Option<String>,
}

impl ResolvedNode {
    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }
}

/// The immutable graph a build runs against.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    graph: DiGraph<ResolvedNode, DepKind>,
    by_label: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
    position: Vec<usize>,
    platform: Platform,
    primary: String,
}

impl ResolvedGraph {
    /// Select variants for `platform` and fix up `order` accordingly.
    ///
    /// `order` must be the structural order of `graph`.
    pub fn resolve(
        graph: &SuiteGraph,
        order: &[NodeIndex],
        platform: &Platform,
    ) -> Result<Self, GraphError> {
        let mut resolved: DiGraph<ResolvedNode, DepKind> = DiGraph::new();
        let mut edges: Vec<Vec<(NodeIndex, DepKind)>> = Vec::new();
        let mut added: Vec<(NodeIndex, NodeIndex)> = Vec::new();

        for index in graph.indices() {
            let declared = graph.node(index);
            let unsupported = || GraphError::UnsupportedPlatform {
                node: declared.label.clone(),
                platform: platform.to_string(),
                supported: declared.node.variant_keys(),
            };

            let mut deps = graph.dependencies(index);
            let mut library = None;
            let mut output = None;

            match &declared.node {
                Node::Library(lib) => {
                    let variant = lib.variants.select(platform);
                    if variant.is_none() && !lib.variants.is_empty() {
                        return Err(unsupported());
                    }
                    library = Some(lib.source_with(variant));
                }
                Node::Project(project) => {
                    output = project.output.clone();
                    if !project.variants.is_empty() {
                        let variant = project.variants.select(platform).ok_or_else(unsupported)?;
                        if variant.output.is_some() {
                            output = variant.output.clone();
                        }

                        for removed in &variant.remove_dependencies {
                            if let Some(target) = graph.resolve_ref(index, removed) {
                                deps.retain(|(d, _)| *d != target);
                            }
                        }
                        for reference in &variant.add_dependencies {
                            let target = graph.resolve_ref(index, reference.target()).ok_or_else(|| {
                                GraphError::DanglingReference {
                                    from: declared.label.clone(),
                                    target: reference.target().to_string(),
                                }
                            })?;
                            match deps.iter_mut().find(|(d, _)| *d == target) {
                                Some((_, kind)) => *kind = (*kind).max(reference.kind()),
                                None => {
                                    deps.push((target, reference.kind()));
                                    added.push((index, target));
                                }
                            }
                        }
                    }
                }
                Node::Distribution(dist) => {
                    output = dist.path.clone();
                    if !dist.variants.is_empty() {
                        let variant = dist.variants.select(platform).ok_or_else(unsupported)?;
                        if variant.path.is_some() {
                            output = variant.path.clone();
                        }
                    }
                }
            }

            resolved.add_node(ResolvedNode {
                label: declared.label.clone(),
                suite: declared.suite.clone(),
                suite_dir: declared.suite_dir.clone(),
                primary: declared.primary,
                node: declared.node.clone(),
                library,
                output,
            });
            edges.push(deps);
        }

        for (from, deps) in edges.into_iter().enumerate() {
            for (to, kind) in deps {
                resolved.add_edge(NodeIndex::new(from), to, kind);
            }
        }

        let by_label = resolved
            .node_indices()
            .map(|n| (resolved[n].label.clone(), n))
            .collect();
        let mut graph = ResolvedGraph {
            graph: resolved,
            by_label,
            order: order.to_vec(),
            position: Vec::new(),
            platform: platform.clone(),
            primary: graph.primary().to_string(),
        };
        graph.index_positions();
        graph.resort(&added)?;
        Ok(graph)
    }

    fn index_positions(&mut self) {
        self.position = vec![0; self.graph.node_count()];
        for (pos, node) in self.order.iter().enumerate() {
            self.position[node.index()] = pos;
        }
    }

    /// Restore a valid order after variant edges were added.
    fn resort(&mut self, added: &[(NodeIndex, NodeIndex)]) -> Result<(), GraphError> {
        let violations: Vec<_> = added
            .iter()
            .filter(|(from, to)| self.position(*to) > self.position(*from))
            .collect();
        let (Some(start), Some(end)) = (
            violations.iter().map(|(from, _)| self.position(*from)).min(),
            violations.iter().map(|(_, to)| self.position(*to)).max(),
        ) else {
            return Ok(());
        };

        tracing::debug!(
            "Variant edges reorder positions {}..={} of the build order",
            start,
            end
        );

        let window: Vec<NodeIndex> = self.order[start..=end].to_vec();
        let members: HashSet<NodeIndex> = window.iter().copied().collect();
        let sorted = dfs_order(&window, |n| {
            self.dependencies(n)
                .into_iter()
                .map(|(d, _)| d)
                .filter(|d| members.contains(d))
                .collect()
        })
        .map_err(|cycle| GraphError::CycleDetected {
            cycle: cycle.into_iter().map(|n| self.graph[n].label.clone()).collect(),
        })?;

        self.order.splice(start..=end, sorted);
        self.index_positions();
        Ok(())
    }

    /// The platform variants were selected for.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Name of the primary suite.
    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Build order: every dependency precedes its dependents.
    pub fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    /// Position of `index` in the build order.
    pub fn position(&self, index: NodeIndex) -> usize {
        self.position[index.index()]
    }

    pub fn node(&self, index: NodeIndex) -> &ResolvedNode {
        &self.graph[index]
    }

    pub fn find(&self, label: &str) -> Option<NodeIndex> {
        self.by_label.get(label).copied()
    }

    /// Effective direct dependencies, in declaration order.
    pub fn dependencies(&self, index: NodeIndex) -> Vec<(NodeIndex, DepKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), *e.weight()))
            .collect();
        edges.sort_by_key(|(id, _, _)| *id);
        edges.into_iter().map(|(_, target, kind)| (target, kind)).collect()
    }

    /// Nodes that depend directly on `index`.
    pub fn dependents(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut nodes: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// `starts` and everything they reach over any edge, in build order.
    pub fn closure(&self, starts: &[NodeIndex]) -> Vec<NodeIndex> {
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = starts.to_vec();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
            }
        }

        let mut nodes: Vec<_> = seen.into_iter().collect();
        nodes.sort_by_key(|n| self.position(*n));
        nodes
    }

    /// Primary-suite nodes in declaration order.
    pub fn primary_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|n| self.graph[*n].primary)
            .collect()
    }

    /// Primary-suite distributions, by name.
    pub fn distributions(&self) -> Vec<&str> {
        self.primary_nodes()
            .into_iter()
            .map(|n| &self.graph[n])
            .filter(|n| n.kind() == NodeKind::Distribution)
            .map(|n| n.label.as_str())
            .collect()
    }

    /// Node `reference` points at when written inside the node at `owner`.
    pub fn resolve_ref(&self, owner: NodeIndex, reference: &RefName) -> Option<NodeIndex> {
        let label = ref_label(&self.primary, &self.graph[owner].suite, reference);
        self.find(&label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::order::sort;
    use crate::test_support::{suite, StaticSuites};

    fn resolve(manifest: &str, platform: &str) -> Result<ResolvedGraph, GraphError> {
        let graph = SuiteGraph::build(&suite(manifest), &StaticSuites::new())?;
        let order = sort(&graph)?;
        ResolvedGraph::resolve(&graph, &order, &platform.parse().unwrap())
    }

    fn labels(graph: &ResolvedGraph) -> Vec<&str> {
        graph
            .order()
            .iter()
            .map(|n| graph.node(*n).label.as_str())
            .collect()
    }

    const NATIVE: &str = r#"
name = "demo"
[libraries.N]
path = "n.jar"
[libraries.N.os-arch.linux.amd64]
path = "n-linux.so"
[libraries.N.os-arch.darwin.amd64]
path = "n-darwin.dylib"
[projects.P]
dependencies = ["N"]
"#;

    #[test]
    fn test_exact_variant_is_selected() {
        let graph = resolve(NATIVE, "darwin/amd64").unwrap();
        let n = graph.find("N").unwrap();
        let source = graph.node(n).library.as_ref().unwrap();
        assert_eq!(source.path.as_deref(), Some("n-darwin.dylib"));
    }

    #[test]
    fn test_unsupported_platform_names_node() {
        let err = resolve(NATIVE, "solaris/sparcv9").unwrap_err();
        match err {
            GraphError::UnsupportedPlatform { node, platform, supported } => {
                assert_eq!(node, "N");
                assert_eq!(platform, "solaris/sparcv9");
                assert_eq!(supported.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wildcard_variants() {
        let manifest = r#"
name = "demo"
[distributions.D]
path = "d.jar"
[distributions.D.os-arch.linux."<others>"]
path = "d-linux.jar"
[distributions.D.os-arch."<others>".aarch64]
path = "d-arm.jar"
[distributions.D.os-arch."<others>"."<others>"]
"#;
        let output = |platform: &str| {
            let graph = resolve(manifest, platform).unwrap();
            let d = graph.find("D").unwrap();
            graph.node(d).output.clone()
        };
        assert_eq!(output("linux/aarch64").as_deref(), Some("d-linux.jar"));
        assert_eq!(output("darwin/aarch64").as_deref(), Some("d-arm.jar"));
        assert_eq!(output("windows/amd64").as_deref(), Some("d.jar"));
    }

    #[test]
    fn test_removed_dependency_drops_edge() {
        let graph = resolve(
            r#"
name = "demo"
[projects.Q]
[projects.P]
dependencies = ["Q"]
[projects.P.os-arch.windows."<others>"]
remove-dependencies = ["Q"]
[projects.P.os-arch."<others>"."<others>"]
"#,
            "windows/amd64",
        )
        .unwrap();
        let p = graph.find("P").unwrap();
        assert!(graph.dependencies(p).is_empty());
        assert!(graph.dependents(graph.find("Q").unwrap()).is_empty());
    }

    #[test]
    fn test_added_dependency_reorders_window() {
        // Structurally: A, B, C, D. On linux, B also depends on D.
        let manifest = r#"
name = "demo"
[projects.A]
[projects.B]
dependencies = ["A"]
[projects.B.os-arch.linux.amd64]
dependencies = ["D"]
[projects.B.os-arch."<others>"."<others>"]
[projects.C]
dependencies = ["B"]
[projects.D]
"#;
        let other = resolve(manifest, "darwin/amd64").unwrap();
        assert_eq!(labels(&other), vec!["A", "B", "C", "D"]);

        let linux = resolve(manifest, "linux/amd64").unwrap();
        assert_eq!(labels(&linux), vec!["A", "D", "B", "C"]);
        for node in linux.order() {
            for (dep, _) in linux.dependencies(*node) {
                assert!(linux.position(dep) < linux.position(*node));
            }
        }
    }

    #[test]
    fn test_variant_edge_cycle_is_detected() {
        let err = resolve(
            r#"
name = "demo"
[projects.A]
[projects.A.os-arch."<others>"."<others>"]
dependencies = ["B"]
[projects.B]
dependencies = ["A"]
"#,
            "linux/amd64",
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_closure_follows_every_edge_kind() {
        let graph = resolve(
            r#"
name = "demo"
[libraries.L]
path = "l.jar"
[projects.Proc]
dependencies = ["L"]
[projects.P]
annotation-processors = ["Proc"]
[projects.Unrelated]
"#,
            "linux/amd64",
        )
        .unwrap();
        let closure: Vec<&str> = graph
            .closure(&[graph.find("P").unwrap()])
            .into_iter()
            .map(|n| graph.node(n).label.as_str())
            .collect();
        assert_eq!(closure, vec!["L", "Proc", "P"]);
    }
}
