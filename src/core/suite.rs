//! A loaded suite: the node model of one manifest.

use std::path::{Path, PathBuf};

use crate::core::import::SuiteImport;
use crate::core::node::Node;

/// A declared license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    pub id: String,
    pub name: Option<String>,
    pub url: Option<String>,
}

/// A declared publication repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    pub url: String,
    pub licenses: Vec<String>,
}

/// An immutable suite, as produced by the manifest loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    name: String,
    revision: Option<String>,
    manifest_path: PathBuf,
    default_license: Option<String>,
    licenses: Vec<License>,
    repositories: Vec<Repository>,
    imports: Vec<SuiteImport>,
    nodes: Vec<Node>,
}

impl Suite {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        revision: Option<String>,
        manifest_path: PathBuf,
        default_license: Option<String>,
        licenses: Vec<License>,
        repositories: Vec<Repository>,
        imports: Vec<SuiteImport>,
        nodes: Vec<Node>,
    ) -> Self {
        Suite {
            name,
            revision,
            manifest_path,
            default_license,
            licenses,
            repositories,
            imports,
            nodes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The revision the suite was loaded at, if known.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Record the revision an import source actually checked out.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Directory containing the manifest; relative node paths resolve here.
    pub fn dir(&self) -> &Path {
        self.manifest_path.parent().unwrap_or(Path::new("."))
    }

    pub fn default_license(&self) -> Option<&str> {
        self.default_license.as_deref()
    }

    pub fn licenses(&self) -> &[License] {
        &self.licenses
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    pub fn imports(&self) -> &[SuiteImport] {
        &self.imports
    }

    /// Find the import declaration for `suite`.
    pub fn import(&self, suite: &str) -> Option<&SuiteImport> {
        self.imports.iter().find(|i| i.name == suite)
    }

    /// All nodes in declaration order: libraries, projects, distributions.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name() == name)
    }
}
