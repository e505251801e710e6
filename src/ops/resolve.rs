//! Suite loading and graph resolution.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::manifest::load_suite;
use crate::core::suite::Suite;
use crate::resolver::{self, ResolvedGraph, ResolvedNode};
use crate::sources::fetch::{Fetcher, HttpFetcher};
use crate::sources::import::{ImportResolver, SuiteProvider};
use crate::util::config::{load_config, RunConfig};
use crate::util::context::GlobalContext;

/// Everything one run needs besides the suite itself: settings plus the
/// sources used for imported suites and library downloads.
pub struct Session {
    run: RunConfig,
    provider: Box<dyn SuiteProvider>,
    fetcher: Arc<dyn Fetcher>,
}

impl Session {
    /// Network-backed session for `run`.
    pub fn new(run: RunConfig) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(run.offline)?);
        let provider = ImportResolver::new(
            &run.suite_cache(),
            fetcher.clone(),
            run.import_overrides.clone(),
        )
        .with_offline(run.offline);
        Ok(Session {
            run,
            provider: Box::new(provider),
            fetcher,
        })
    }

    /// Session over caller-supplied sources.
    pub fn with_sources(
        run: RunConfig,
        provider: Box<dyn SuiteProvider>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Session {
            run,
            provider,
            fetcher,
        }
    }

    pub fn run(&self) -> &RunConfig {
        &self.run
    }

    pub fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    /// Resolve `suite` for the configured platform.
    pub fn resolve(&self, suite: &Suite) -> Result<ResolvedGraph> {
        tracing::debug!(
            "Resolving `{}` for {}",
            suite.name(),
            self.run.platform
        );
        let graph = resolver::resolve(suite, self.provider.as_ref(), &self.run.platform)?;
        tracing::info!(
            "Resolved {} node(s) for {}",
            graph.node_count(),
            graph.platform()
        );
        Ok(graph)
    }
}

/// Load the suite manifest at `manifest_path`.
pub fn load(manifest_path: &Path) -> Result<Suite> {
    let suite = load_suite(manifest_path)?;
    Ok(suite)
}

/// Merge the global and suite configuration files for a suite.
pub fn run_config(ctx: &GlobalContext, manifest_path: &Path) -> Result<RunConfig> {
    let suite_dir = manifest_path
        .parent()
        .with_context(|| format!("{} has no parent directory", manifest_path.display()))?;
    let config = load_config(&ctx.config_path(), &ctx.project_config_path(suite_dir));
    Ok(RunConfig::from_config(&config, ctx, suite_dir))
}

/// The build order, restricted to the primary suite unless `all` is set.
pub fn build_order(graph: &ResolvedGraph, all: bool) -> Vec<&ResolvedNode> {
    graph
        .order()
        .iter()
        .map(|n| graph.node(*n))
        .filter(|n| all || n.primary)
        .collect()
}
