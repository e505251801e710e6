//! Cycle detection and topological ordering.
//!
//! A depth-first traversal colors nodes unvisited, in-progress or done and
//! emits each node once all of its dependencies are done. Start nodes and
//! dependencies are visited in a fixed order, so the same graph always
//! yields the same build order.

use std::collections::HashMap;

use petgraph::graph::NodeIndex;

use crate::resolver::errors::GraphError;
use crate::resolver::graph::SuiteGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    InProgress,
    Done,
}

/// Order `starts` and everything reachable from them, dependencies first.
///
/// On a cycle, returns the cycle path with its first node repeated at the
/// end (`A, B, A`).
pub fn dfs_order<F>(starts: &[NodeIndex], dependencies: F) -> Result<Vec<NodeIndex>, Vec<NodeIndex>>
where
    F: Fn(NodeIndex) -> Vec<NodeIndex>,
{
    let mut color: HashMap<NodeIndex, Color> = HashMap::new();
    let mut order = Vec::new();

    for &start in starts {
        if color.contains_key(&start) {
            continue;
        }

        // (node, its dependencies, next dependency to visit)
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
        color.insert(start, Color::InProgress);
        stack.push((start, dependencies(start), 0));

        while let Some((node, deps, next)) = stack.last_mut() {
            let Some(&dep) = deps.get(*next) else {
                color.insert(*node, Color::Done);
                order.push(*node);
                stack.pop();
                continue;
            };
            *next += 1;

            match color.get(&dep) {
                Some(Color::Done) => {}
                Some(Color::InProgress) => {
                    let from = stack
                        .iter()
                        .position(|(n, _, _)| *n == dep)
                        .unwrap_or(0);
                    let mut cycle: Vec<NodeIndex> = stack[from..].iter().map(|(n, _, _)| *n).collect();
                    cycle.push(dep);
                    return Err(cycle);
                }
                None => {
                    color.insert(dep, Color::InProgress);
                    stack.push((dep, dependencies(dep), 0));
                }
            }
        }
    }

    Ok(order)
}

/// Build order of the whole graph.
pub fn sort(graph: &SuiteGraph) -> Result<Vec<NodeIndex>, GraphError> {
    let starts: Vec<NodeIndex> = graph.indices().collect();
    dfs_order(&starts, |n| {
        graph.dependencies(n).into_iter().map(|(d, _)| d).collect()
    })
    .map_err(|cycle| GraphError::CycleDetected {
        cycle: cycle.into_iter().map(|n| graph.node(n).label.clone()).collect(),
    })
}
