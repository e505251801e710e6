//! Implementation of `berth build`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use petgraph::graph::NodeIndex;

use crate::builder::{BuildDriver, BuildReport, EventSink, NodeBuilder};
use crate::core::suite::Suite;
use crate::ops::dist::assemble_all;
use crate::ops::fetch::verify_libraries;
use crate::ops::resolve::Session;
use crate::resolver::{GraphError, ResolvedGraph};

/// Options for the build command.
#[derive(Default)]
pub struct BuildOptions<'a> {
    /// Distribution to build (`None` = every primary-suite node)
    pub distribution: Option<String>,

    /// Show a progress bar
    pub progress: bool,

    /// Receiver of machine-readable events
    pub events: Option<&'a dyn EventSink>,
}

/// Resolve, verify and build `suite`.
///
/// Graph and verification errors are returned before any node is handed to
/// `builder`; node failures are part of the returned report.
pub fn build(
    suite: &Suite,
    session: &Session,
    builder: &dyn NodeBuilder,
    opts: &BuildOptions<'_>,
    cancel: Arc<AtomicBool>,
) -> Result<BuildReport> {
    let graph = session.resolve(suite)?;
    let targets = select_targets(&graph, opts.distribution.as_deref())?;
    let set = graph.closure(&targets);
    let run = session.run();

    let assemblies = assemble_all(&graph, &set, run)?;
    let libraries = verify_libraries(&graph, &set, run, session.fetcher())?;

    let mut driver = BuildDriver::new(&graph, builder, run, cancel)
        .with_libraries(libraries)
        .with_assemblies(assemblies)
        .with_progress(opts.progress);
    if let Some(events) = opts.events {
        driver = driver.with_events(events);
    }
    Ok(driver.run(&targets))
}

/// The nodes a build starts from.
fn select_targets(graph: &ResolvedGraph, distribution: Option<&str>) -> Result<Vec<NodeIndex>> {
    match distribution {
        None => Ok(graph.primary_nodes()),
        Some(name) => {
            let index = graph
                .find(name)
                .filter(|n| graph.node(*n).node.as_distribution().is_some())
                .ok_or_else(|| GraphError::UnknownDistribution {
                    name: name.to_string(),
                    available: graph.distributions().into_iter().map(str::to_string).collect(),
                })?;
            Ok(vec![index])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{JsonLines, NodeStatus, RunOutcome};
    use crate::core::platform::Platform;
    use crate::ops::resolve::load;
    use crate::sources::verify::VerifyError;
    use crate::test_support::{MockFetcher, RecordingBuilder, StaticSuites, SuiteFixture};
    use crate::util::config::RunConfig;
    use tempfile::TempDir;

    const SUITE: &str = r#"
name = "demo"

[libraries.L]
path = "lib/l.jar"

[projects.core]
dependencies = ["L"]

[projects.app]
dependencies = ["core"]

[projects.unrelated]

[distributions.APP]
dependencies = ["app"]
"#;

    fn setup(tmp: &TempDir, manifest: &str) -> (Suite, Session) {
        let path = SuiteFixture::new("demo", manifest)
            .with_file("lib/l.jar", "jar")
            .write_to(tmp.path())
            .unwrap();
        let suite = load(&path).unwrap();
        let run = RunConfig::for_suite(suite.dir(), tmp.path().join("cache"))
            .with_platform(Platform::new("linux", "amd64"))
            .with_jobs(1);
        let session = Session::with_sources(run, Box::new(StaticSuites::new()), Arc::new(MockFetcher::new()));
        (suite, session)
    }

    fn cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_build_everything() {
        let tmp = TempDir::new().unwrap();
        let (suite, session) = setup(&tmp, SUITE);
        let builder = RecordingBuilder::new();

        let report = build(&suite, &session, &builder, &BuildOptions::default(), cancel()).unwrap();
        assert_eq!(report.outcome(), RunOutcome::Success);
        assert_eq!(builder.calls(), vec!["core", "app", "unrelated", "APP"]);
        assert_eq!(
            builder.dependencies_of("core"),
            vec![suite.dir().join("lib/l.jar")]
        );
    }

    #[test]
    fn test_build_one_distribution() {
        let tmp = TempDir::new().unwrap();
        let (suite, session) = setup(&tmp, SUITE);
        let builder = RecordingBuilder::new();
        let opts = BuildOptions {
            distribution: Some("APP".to_string()),
            ..Default::default()
        };

        let report = build(&suite, &session, &builder, &opts, cancel()).unwrap();
        assert!(report.is_success());
        assert_eq!(builder.calls(), vec!["core", "app", "APP"]);
        assert!(report.status("unrelated").is_none());
    }

    #[test]
    fn test_unknown_distribution_builds_nothing() {
        let tmp = TempDir::new().unwrap();
        let (suite, session) = setup(&tmp, SUITE);
        let builder = RecordingBuilder::new();
        let opts = BuildOptions {
            distribution: Some("NOPE".to_string()),
            ..Default::default()
        };

        let err = build(&suite, &session, &builder, &opts, cancel()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::UnknownDistribution { .. })
        ));
        assert!(builder.calls().is_empty());
    }

    #[test]
    fn test_invalid_exclusion_aborts_before_building() {
        let tmp = TempDir::new().unwrap();
        let manifest = format!("{}exclude = [\"unrelated\"]\n", SUITE);
        let (suite, session) = setup(&tmp, &manifest);
        let builder = RecordingBuilder::new();

        let err = build(&suite, &session, &builder, &BuildOptions::default(), cancel()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::InvalidExclusion { .. })
        ));
        assert!(builder.calls().is_empty());
    }

    #[test]
    fn test_missing_library_aborts_before_building() {
        let tmp = TempDir::new().unwrap();
        let (suite, session) = setup(&tmp, &SUITE.replace("lib/l.jar", "lib/missing.jar"));
        let builder = RecordingBuilder::new();

        let err = build(&suite, &session, &builder, &BuildOptions::default(), cancel()).unwrap_err();
        assert!(err.downcast_ref::<VerifyError>().is_some());
        assert!(builder.calls().is_empty());
    }

    #[test]
    fn test_failure_is_reported_not_returned() {
        let tmp = TempDir::new().unwrap();
        let (suite, session) = setup(&tmp, SUITE);
        let builder = RecordingBuilder::new().fail("core");
        let events = JsonLines::new(Vec::new());
        let opts = BuildOptions {
            events: Some(&events),
            ..Default::default()
        };

        let report = build(&suite, &session, &builder, &opts, cancel()).unwrap();
        assert_eq!(report.outcome(), RunOutcome::PartialFailure);
        assert_eq!(
            report.status("app"),
            Some(&NodeStatus::Skipped {
                cause: "core".to_string()
            })
        );
        assert!(report.status("unrelated").unwrap().is_built());

        let lines = String::from_utf8(events.into_inner()).unwrap();
        assert!(lines.lines().last().unwrap().contains("\"reason\":\"build-finished\""));
    }
}
