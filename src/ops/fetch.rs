//! Library verification for a build set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use petgraph::graph::NodeIndex;

use crate::core::node::NodeKind;
use crate::resolver::ResolvedGraph;
use crate::sources::cache::LibraryCache;
use crate::sources::fetch::Fetcher;
use crate::sources::verify::{LibraryRequest, Verifier};
use crate::util::config::RunConfig;

/// Verify every library among `nodes`, downloading what is missing.
///
/// All libraries are attempted; the first failure is returned after every
/// failure has been logged.
pub fn verify_libraries(
    graph: &ResolvedGraph,
    nodes: &[NodeIndex],
    run: &RunConfig,
    fetcher: Arc<dyn Fetcher>,
) -> Result<HashMap<NodeIndex, PathBuf>> {
    let (indices, requests): (Vec<NodeIndex>, Vec<LibraryRequest>) = nodes
        .iter()
        .filter_map(|n| {
            let node = graph.node(*n);
            let source = node.library.clone()?;
            Some((
                *n,
                LibraryRequest {
                    label: node.label.clone(),
                    source,
                    suite_dir: node.suite_dir.clone(),
                },
            ))
        })
        .unzip();

    if requests.is_empty() {
        return Ok(HashMap::new());
    }
    tracing::info!("Verifying {} librar{}", requests.len(), if requests.len() == 1 { "y" } else { "ies" });

    let verifier = Verifier::new(LibraryCache::new(run.library_cache()), fetcher);
    let mut verified = HashMap::new();
    let mut first_error = None;
    for (index, (label, result)) in indices.into_iter().zip(verifier.verify_all(&requests, run.jobs)) {
        match result {
            Ok(path) => {
                tracing::debug!("{} -> {}", label, path.display());
                verified.insert(index, path);
            }
            Err(e) => {
                tracing::error!("{}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(verified),
    }
}

/// Verify every library the primary suite uses, in build order.
pub fn fetch(
    graph: &ResolvedGraph,
    run: &RunConfig,
    fetcher: Arc<dyn Fetcher>,
) -> Result<Vec<(String, PathBuf)>> {
    let set: Vec<NodeIndex> = graph
        .closure(&graph.primary_nodes())
        .into_iter()
        .filter(|n| graph.node(*n).kind() == NodeKind::Library)
        .collect();
    let verified = verify_libraries(graph, &set, run, fetcher)?;

    Ok(set
        .into_iter()
        .filter_map(|n| {
            verified
                .get(&n)
                .map(|path| (graph.node(n).label.clone(), path.clone()))
        })
        .collect())
}
