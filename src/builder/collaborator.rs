//! The per-node build contract.
//!
//! Compiling a project or packaging a distribution is not done here: the
//! driver hands each node to a [`NodeBuilder`] together with the artifacts
//! of its dependencies and gets back the node's own artifact.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use thiserror::Error;

use crate::core::dependency::DepKind;
use crate::core::node::NodeKind;
use crate::core::platform::Platform;
use crate::resolver::platform::ResolvedNode;
use crate::util::process::ProcessBuilder;

/// Prefix of the stdout line a build program uses to report its artifact.
pub const ARTIFACT_DIRECTIVE: &str = "berth:artifact=";

/// A dependency that is already built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltDependency {
    pub label: String,
    pub kind: DepKind,
    pub artifact: PathBuf,
}

/// Everything a collaborator needs to build one node.
#[derive(Debug)]
pub struct BuildRequest<'a> {
    pub node: &'a ResolvedNode,
    /// Where the node's output should go.
    pub output: PathBuf,
    /// Built dependencies. For a distribution, its packaged artifacts.
    pub dependencies: Vec<BuiltDependency>,
    /// Outputs of generated dependencies, extra source roots of the node.
    pub generated_roots: Vec<PathBuf>,
    pub platform: &'a Platform,
    /// Raised when the build is cancelled.
    pub cancel: &'a AtomicBool,
}

impl BuildRequest<'_> {
    pub fn label(&self) -> &str {
        &self.node.label
    }

    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }
}

/// A node that could not be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BuildFailure {
    pub message: String,
    /// Whether the whole build must stop.
    pub fatal: bool,
}

impl BuildFailure {
    pub fn new(message: impl Into<String>) -> Self {
        BuildFailure {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        BuildFailure {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Builds one node and returns its artifact.
pub trait NodeBuilder: Send + Sync {
    fn build(&self, request: &BuildRequest<'_>) -> Result<PathBuf, BuildFailure>;
}

/// Runs an external program once per node.
///
/// The node is described in `BERTH_*` environment variables; path lists
/// use the platform's path separator. A non-zero exit fails the node, a
/// program that cannot be started fails the whole build.
#[derive(Debug, Clone)]
pub struct CommandNodeBuilder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandNodeBuilder {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        CommandNodeBuilder {
            program: program.into(),
            args,
        }
    }

    fn command(&self, request: &BuildRequest<'_>) -> ProcessBuilder {
        let node = request.node;
        let dependencies = join_paths(request.dependencies.iter().map(|d| d.artifact.as_path()));
        let generated = join_paths(request.generated_roots.iter().map(PathBuf::as_path));

        ProcessBuilder::new(&self.program)
            .args(&self.args)
            .cwd(&node.suite_dir)
            .env("BERTH_NODE", &node.label)
            .env("BERTH_NODE_KIND", node.kind().as_str())
            .env("BERTH_SUITE", &node.suite)
            .env("BERTH_SUITE_DIR", node.suite_dir.display().to_string())
            .env("BERTH_OUTPUT", request.output.display().to_string())
            .env("BERTH_DEPENDENCIES", dependencies)
            .env("BERTH_GENERATED_ROOTS", generated)
            .env("BERTH_OS", request.platform.os())
            .env("BERTH_ARCH", request.platform.arch())
    }
}

impl NodeBuilder for CommandNodeBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<PathBuf, BuildFailure> {
        let cmd = self.command(request);
        tracing::debug!("Running `{}` for {}", cmd.display_command(), request.label());

        let output = match cmd.exec_cancellable(request.cancel) {
            Ok(Some(output)) => output,
            Ok(None) => return Err(BuildFailure::new("cancelled")),
            Err(e) => return Err(BuildFailure::fatal(format!("{:#}", e))),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut message = format!("`{}` exited with {}", cmd.display_command(), output.status);
            if let Some(last) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                message.push_str(": ");
                message.push_str(last.trim());
            }
            return Err(BuildFailure::new(message));
        }

        Ok(reported_artifact(&stdout, &request.node.suite_dir).unwrap_or_else(|| request.output.clone()))
    }
}

/// The last artifact directive in `stdout`, relative to `base`.
fn reported_artifact(stdout: &str, base: &Path) -> Option<PathBuf> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(ARTIFACT_DIRECTIVE))
        .map(|path| base.join(path.trim()))
}

fn join_paths<'a>(paths: impl Iterator<Item = &'a Path>) -> String {
    let separator = if cfg!(windows) { ";" } else { ":" };
    paths
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::{Node, Project};
    use tempfile::TempDir;

    fn project(dir: &Path) -> ResolvedNode {
        ResolvedNode {
            label: "demo.parser".to_string(),
            suite: "demo".to_string(),
            suite_dir: dir.to_path_buf(),
            primary: true,
            node: Node::Project(Project {
                name: "demo.parser".to_string(),
                ..Default::default()
            }),
            library: None,
            output: None,
        }
    }

    fn request<'a>(node: &'a ResolvedNode, platform: &'a Platform, cancel: &'a AtomicBool) -> BuildRequest<'a> {
        BuildRequest {
            node,
            output: node.suite_dir.join("out"),
            dependencies: vec![
                BuiltDependency {
                    label: "A".into(),
                    kind: DepKind::Plain,
                    artifact: PathBuf::from("/a.jar"),
                },
                BuiltDependency {
                    label: "B".into(),
                    kind: DepKind::Plain,
                    artifact: PathBuf::from("/b.jar"),
                },
            ],
            generated_roots: Vec::new(),
            platform,
            cancel,
        }
    }

    #[test]
    fn test_reported_artifact() {
        let base = Path::new("/suite");
        assert_eq!(
            reported_artifact("compiling\nberth:artifact=out/p.jar\n", base),
            Some(PathBuf::from("/suite/out/p.jar"))
        );
        assert_eq!(reported_artifact("nothing to report\n", base), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_builder_environment() {
        let tmp = TempDir::new().unwrap();
        let node = project(tmp.path());
        let platform = Platform::new("linux", "amd64");
        let cancel = AtomicBool::new(false);

        let builder = CommandNodeBuilder::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo \"$BERTH_NODE $BERTH_NODE_KIND $BERTH_OS/$BERTH_ARCH $BERTH_DEPENDENCIES\" > env.txt".to_string(),
            ],
        );
        let artifact = builder.build(&request(&node, &platform, &cancel)).unwrap();

        assert_eq!(artifact, tmp.path().join("out"));
        let env = std::fs::read_to_string(tmp.path().join("env.txt")).unwrap();
        assert_eq!(env.trim(), "demo.parser project linux/amd64 /a.jar:/b.jar");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_builder_failure() {
        let tmp = TempDir::new().unwrap();
        let node = project(tmp.path());
        let platform = Platform::new("linux", "amd64");
        let cancel = AtomicBool::new(false);

        let builder = CommandNodeBuilder::new(
            "sh",
            vec!["-c".to_string(), "echo 'cannot find symbol' >&2; exit 1".to_string()],
        );
        let failure = builder.build(&request(&node, &platform, &cancel)).unwrap_err();
        assert!(!failure.fatal);
        assert!(failure.message.contains("cannot find symbol"));
    }

    #[test]
    fn test_missing_program_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let node = project(tmp.path());
        let platform = Platform::new("linux", "amd64");
        let cancel = AtomicBool::new(false);

        let builder = CommandNodeBuilder::new(tmp.path().join("no-such-builder"), Vec::new());
        let failure = builder.build(&request(&node, &platform, &cancel)).unwrap_err();
        assert!(failure.fatal);
    }
}
