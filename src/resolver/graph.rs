//! The node graph of a primary suite and the suites it imports.
//!
//! Edges point from a dependent to its dependency and carry the strongest
//! [`DepKind`] among the references that produced them. Nodes of the
//! primary suite are labelled with their bare name, imported nodes with
//! `suite:NAME`. Only imported nodes that are actually referenced enter the
//! graph.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::core::dependency::{DepKind, DependencyRef, RefName};
use crate::core::manifest::check_reference_kind;
use crate::core::node::{Node, NodeKind};
use crate::core::suite::Suite;
use crate::resolver::errors::GraphError;
use crate::sources::import::{ImportError, SuiteProvider};

/// One node of the graph, together with where it was declared.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// `NAME` for primary-suite nodes, `suite:NAME` otherwise.
    pub label: String,
    /// Name of the declaring suite.
    pub suite: String,
    /// Directory of the declaring suite's manifest.
    pub suite_dir: PathBuf,
    pub node: Node,
    /// Whether the node belongs to the primary suite.
    pub primary: bool,
}

/// Label of `name` declared in `suite`, as seen from the primary suite.
pub(crate) fn label_for(primary: &str, suite: &str, name: &str) -> String {
    if suite == primary {
        name.to_string()
    } else {
        format!("{}:{}", suite, name)
    }
}

/// Label `reference` resolves to when written inside `owner`.
pub(crate) fn ref_label(primary: &str, owner: &str, reference: &RefName) -> String {
    let suite = reference.suite().unwrap_or(owner);
    label_for(primary, suite, reference.name())
}

/// The unresolved-by-platform dependency graph.
#[derive(Debug, Clone)]
pub struct SuiteGraph {
    graph: DiGraph<GraphNode, DepKind>,
    by_label: HashMap<String, NodeIndex>,
    suites: HashMap<String, Arc<Suite>>,
    primary: String,
}

impl SuiteGraph {
    /// Build the graph of `primary`, pulling imported nodes from `provider`.
    pub fn build(primary: &Suite, provider: &dyn SuiteProvider) -> Result<Self, GraphError> {
        check_collisions(primary)?;

        let mut builder = Builder {
            graph: SuiteGraph {
                graph: DiGraph::new(),
                by_label: HashMap::new(),
                suites: HashMap::new(),
                primary: primary.name().to_string(),
            },
            provider,
            queue: VecDeque::new(),
        };
        let primary = Arc::new(primary.clone());
        builder
            .graph
            .suites
            .insert(primary.name().to_string(), primary.clone());

        for node in primary.nodes() {
            builder.add_node(&primary, node);
        }

        while let Some(index) = builder.queue.pop_front() {
            builder.connect(index)?;
        }

        let graph = builder.graph;
        tracing::debug!(
            "Built graph with {} nodes and {} edges",
            graph.graph.node_count(),
            graph.graph.edge_count()
        );
        Ok(graph)
    }

    /// Name of the primary suite.
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// A suite taking part in the graph.
    pub fn suite(&self, name: &str) -> Option<&Arc<Suite>> {
        self.suites.get(name)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Every node index: primary nodes in declaration order, then imported
    /// nodes in discovery order.
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.graph[index]
    }

    pub fn find(&self, label: &str) -> Option<NodeIndex> {
        self.by_label.get(label).copied()
    }

    /// Direct dependencies of `index`, in declaration order.
    pub fn dependencies(&self, index: NodeIndex) -> Vec<(NodeIndex, DepKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), *e.weight()))
            .collect();
        edges.sort_by_key(|(id, _, _)| *id);
        edges.into_iter().map(|(_, target, kind)| (target, kind)).collect()
    }

    /// Node `reference` points at when written inside the node at `owner`.
    pub fn resolve_ref(&self, owner: NodeIndex, reference: &RefName) -> Option<NodeIndex> {
        let label = ref_label(&self.primary, &self.graph[owner].suite, reference);
        self.find(&label)
    }
}

struct Builder<'a> {
    graph: SuiteGraph,
    provider: &'a dyn SuiteProvider,
    queue: VecDeque<NodeIndex>,
}

impl Builder<'_> {
    fn add_node(&mut self, suite: &Arc<Suite>, node: &Node) -> NodeIndex {
        let label = label_for(&self.graph.primary, suite.name(), node.name());
        if let Some(&index) = self.graph.by_label.get(&label) {
            return index;
        }

        let index = self.graph.graph.add_node(GraphNode {
            label: label.clone(),
            suite: suite.name().to_string(),
            suite_dir: suite.dir().to_path_buf(),
            node: node.clone(),
            primary: suite.name() == self.graph.primary,
        });
        self.graph.by_label.insert(label, index);
        self.queue.push_back(index);
        index
    }

    /// Resolve every reference of the node at `index`.
    fn connect(&mut self, index: NodeIndex) -> Result<(), GraphError> {
        let owner = self.graph.graph[index].clone();
        let suite = self.owning_suite(&owner.suite)?;

        for reference in owner.node.references() {
            let target = self.resolve(&owner, &suite, reference)?;
            self.add_edge(index, target, reference.kind());
        }

        // Variant-only targets must exist, but only become edges once a
        // platform is selected.
        for reference in owner.node.variant_references() {
            self.resolve(&owner, &suite, reference)?;
        }
        Ok(())
    }

    fn owning_suite(&self, name: &str) -> Result<Arc<Suite>, GraphError> {
        self.graph
            .suites
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::DanglingReference {
                from: self.graph.primary.clone(),
                target: name.to_string(),
            })
    }

    fn resolve(
        &mut self,
        owner: &GraphNode,
        suite: &Arc<Suite>,
        reference: &DependencyRef,
    ) -> Result<NodeIndex, GraphError> {
        let target = reference.target();
        let dangling = || GraphError::DanglingReference {
            from: owner.label.clone(),
            target: target.to_string(),
        };

        let target_suite = match target.suite() {
            Some(name) if name != suite.name() => self.imported_suite(suite, name)?,
            _ => suite.clone(),
        };

        let node = target_suite.node(target.name()).ok_or_else(dangling)?;
        if target_suite.name() != suite.name() {
            check_reference_kind(&owner.label, reference, node.kind())?;
        }
        Ok(self.add_node(&target_suite, node))
    }

    fn imported_suite(&mut self, importer: &Suite, name: &str) -> Result<Arc<Suite>, GraphError> {
        if let Some(suite) = self.graph.suites.get(name) {
            return Ok(suite.clone());
        }

        let import = importer.import(name).ok_or_else(|| ImportError::NotImported {
            importer: importer.name().to_string(),
            suite: name.to_string(),
        })?;
        let suite = self.provider.provide(import)?;
        check_collisions(&suite)?;

        tracing::debug!(
            "Imported suite `{}` at {}",
            suite.name(),
            suite.revision().unwrap_or("unknown revision")
        );
        self.graph.suites.insert(name.to_string(), suite.clone());
        Ok(suite)
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: DepKind) {
        match self.graph.graph.find_edge(from, to) {
            Some(edge) => {
                let weight = &mut self.graph.graph[edge];
                *weight = (*weight).max(kind);
            }
            None => {
                self.graph.graph.add_edge(from, to, kind);
            }
        }
    }
}

/// Reject two entries of one suite sharing a name.
fn check_collisions(suite: &Suite) -> Result<(), GraphError> {
    let mut seen: HashMap<&str, NodeKind> = HashMap::new();
    for node in suite.nodes() {
        if let Some(first) = seen.insert(node.name(), node.kind()) {
            return Err(GraphError::NameCollision {
                suite: suite.name().to_string(),
                name: node.name().to_string(),
                first: first.to_string(),
                second: node.kind().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{suite, StaticSuites};

    const TRUFFLE: &str = r#"
name = "truffle"
[libraries.JLINE]
path = "lib/jline.jar"
[projects."truffle.api"]
dependencies = ["JLINE"]
[projects."truffle.dsl.processor"]
dependencies = ["truffle.api"]
[distributions.TRUFFLE_API]
dependencies = ["truffle.api"]
"#;

    fn labels(graph: &SuiteGraph, deps: Vec<(NodeIndex, DepKind)>) -> Vec<String> {
        deps.into_iter()
            .map(|(i, k)| format!("{} ({})", graph.node(i).label, k))
            .collect()
    }

    #[test]
    fn test_edges_follow_declaration_order() {
        let primary = suite(
            r#"
name = "demo"
[libraries.L1]
path = "l1.jar"
[libraries.L2]
path = "l2.jar"
[projects.P]
dependencies = ["L2", "L1"]
"#,
        );
        let graph = SuiteGraph::build(&primary, &StaticSuites::new()).unwrap();
        let p = graph.find("P").unwrap();
        assert_eq!(labels(&graph, graph.dependencies(p)), vec!["L2 (plain)", "L1 (plain)"]);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_duplicate_references_keep_strongest_kind() {
        let primary = suite(
            r#"
name = "demo"
[projects.Q]
[projects.P]
dependencies = ["Q"]
generated-dependencies = ["Q"]
"#,
        );
        let graph = SuiteGraph::build(&primary, &StaticSuites::new()).unwrap();
        let p = graph.find("P").unwrap();
        assert_eq!(labels(&graph, graph.dependencies(p)), vec!["Q (generated)"]);
    }

    #[test]
    fn test_dangling_reference() {
        let primary = suite(
            r#"
name = "demo"
[projects.P]
dependencies = ["MISSING"]
"#,
        );
        let err = SuiteGraph::build(&primary, &StaticSuites::new()).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingReference {
                from: "P".to_string(),
                target: "MISSING".to_string()
            }
        );
    }

    #[test]
    fn test_name_collision() {
        let primary = suite(
            r#"
name = "demo"
[libraries.X]
path = "x.jar"
[projects.X]
"#,
        );
        let err = SuiteGraph::build(&primary, &StaticSuites::new()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::NameCollision { ref name, ref first, ref second, .. }
                if name == "X" && first == "library" && second == "project"
        ));
    }

    #[test]
    fn test_cross_suite_references() {
        let primary = suite(
            r#"
name = "demo"
[[imports]]
name = "truffle"
revision = "0.9"
urls = [{ url = "https://git.example.com/truffle.git", kind = "git" }]
[projects.P]
dependencies = ["truffle:TRUFFLE_API"]
annotation-processors = ["truffle:truffle.dsl.processor"]
"#,
        );
        let provider = StaticSuites::new().with(suite(TRUFFLE));
        let graph = SuiteGraph::build(&primary, &provider).unwrap();

        let p = graph.find("P").unwrap();
        assert_eq!(
            labels(&graph, graph.dependencies(p)),
            vec!["truffle:TRUFFLE_API (plain)", "truffle:truffle.dsl.processor (processor)"]
        );

        // Imported nodes pull in their own dependencies, nothing more.
        assert!(graph.find("truffle:truffle.api").is_some());
        assert!(graph.find("truffle:JLINE").is_some());
        assert_eq!(graph.node_count(), 5);
        assert!(!graph.node(graph.find("truffle:JLINE").unwrap()).primary);
        assert_eq!(provider.requests(), 1);
    }

    #[test]
    fn test_cross_suite_reference_needs_import() {
        let primary = suite(
            r#"
name = "demo"
[projects.P]
dependencies = ["truffle:TRUFFLE_API"]
"#,
        );
        let provider = StaticSuites::new().with(suite(TRUFFLE));
        let err = SuiteGraph::build(&primary, &provider).unwrap_err();
        assert!(matches!(err, GraphError::Import(ImportError::NotImported { .. })));
    }

    #[test]
    fn test_cross_suite_reference_kind_is_checked() {
        let primary = suite(
            r#"
name = "demo"
[[imports]]
name = "truffle"
revision = "0.9"
urls = [{ url = "https://git.example.com/truffle.git", kind = "git" }]
[projects.P]
generated-dependencies = ["truffle:JLINE"]
"#,
        );
        let provider = StaticSuites::new().with(suite(TRUFFLE));
        let err = SuiteGraph::build(&primary, &provider).unwrap_err();
        assert!(matches!(err, GraphError::Manifest(_)));
    }

    #[test]
    fn test_variant_targets_are_checked_but_not_connected() {
        let primary = suite(
            r#"
name = "demo"
[libraries.JNA]
path = "jna.jar"
[projects.P]
[projects.P.os-arch.darwin.amd64]
dependencies = ["JNA"]
"#,
        );
        let graph = SuiteGraph::build(&primary, &StaticSuites::new()).unwrap();
        let p = graph.find("P").unwrap();
        assert!(graph.dependencies(p).is_empty());

        let broken = suite(
            r#"
name = "demo"
[projects.P]
[projects.P.os-arch.darwin.amd64]
dependencies = ["JNA"]
"#,
        );
        assert!(matches!(
            SuiteGraph::build(&broken, &StaticSuites::new()),
            Err(GraphError::DanglingReference { .. })
        ));
    }
}
