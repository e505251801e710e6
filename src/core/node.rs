//! Suite entries: libraries, projects and distributions.

use std::fmt;

use serde::Serialize;
use url::Url;

use crate::core::dependency::{DependencyRef, RefName};
use crate::core::platform::VariantTable;
use crate::util::hash::Checksum;

/// Hash sentinel that disables verification of a library.
pub const NOCHECK: &str = "NOCHECK";

/// The kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Library,
    Project,
    Distribution,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Library => "library",
            NodeKind::Project => "project",
            NodeKind::Distribution => "distribution",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected content of a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryHash {
    /// Content must match this digest.
    Checked(Checksum),
    /// Declared `NOCHECK`: the artifact is trusted as-is.
    Unchecked,
}

/// Where a library comes from and how it is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySource {
    /// Local path relative to the suite directory; may contain `${VAR}`.
    pub path: Option<String>,
    /// Download mirrors, tried in order.
    pub urls: Vec<Url>,
    /// `None` only for local-path-only libraries.
    pub hash: Option<LibraryHash>,
}

/// Platform-specific overrides of a library's source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryVariant {
    pub path: Option<String>,
    pub urls: Option<Vec<Url>>,
    pub hash: Option<LibraryHash>,
}

/// A prebuilt binary dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub name: String,
    pub source: LibrarySource,
    /// Runtime resource rather than a compile-time artifact.
    pub resource: bool,
    pub variants: VariantTable<LibraryVariant>,
}

impl Library {
    /// The effective source once a platform variant has been chosen.
    pub fn source_with(&self, variant: Option<&LibraryVariant>) -> LibrarySource {
        let mut source = self.source.clone();
        if let Some(variant) = variant {
            if variant.path.is_some() {
                source.path = variant.path.clone();
            }
            if let Some(urls) = &variant.urls {
                source.urls = urls.clone();
            }
            if variant.hash.is_some() {
                source.hash = variant.hash.clone();
            }
        }
        source
    }
}

/// Platform-specific changes to a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectVariant {
    pub output: Option<String>,
    /// Dependencies that only exist on this platform.
    pub add_dependencies: Vec<DependencyRef>,
    /// Base dependencies dropped on this platform.
    pub remove_dependencies: Vec<RefName>,
}

/// A compilable source module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    /// Opaque to the core, handed to the build collaborator.
    pub source_dirs: Vec<String>,
    /// Plain, annotation-processor and generated references, in declaration order.
    pub dependencies: Vec<DependencyRef>,
    /// Opaque language compliance tag.
    pub compliance: Option<String>,
    pub native: bool,
    /// Opaque builder hint.
    pub class: Option<String>,
    pub output: Option<String>,
    pub variants: VariantTable<ProjectVariant>,
}

/// Platform-specific changes to a distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionVariant {
    pub path: Option<String>,
}

/// A named packaging unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub name: String,
    pub description: Option<String>,
    /// Projects and libraries whose outputs are packaged.
    pub members: Vec<DependencyRef>,
    /// Closure entries deliberately left out of the package.
    pub exclude: Vec<RefName>,
    /// Distributions this one is staged on.
    pub dist_dependencies: Vec<DependencyRef>,
    pub path: Option<String>,
    pub sub_dir: Option<String>,
    pub main_class: Option<String>,
    /// Whether publication metadata is generated at all.
    pub publish: bool,
    /// Closure entries left out of publication metadata only.
    pub publication_exclude: Vec<RefName>,
    pub variants: VariantTable<DistributionVariant>,
}

/// Any entry of a suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Library(Library),
    Project(Project),
    Distribution(Distribution),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Library(l) => &l.name,
            Node::Project(p) => &p.name,
            Node::Distribution(d) => &d.name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Library(_) => NodeKind::Library,
            Node::Project(_) => NodeKind::Project,
            Node::Distribution(_) => NodeKind::Distribution,
        }
    }

    /// Structural references, present on every platform.
    pub fn references(&self) -> Vec<&DependencyRef> {
        match self {
            Node::Library(_) => Vec::new(),
            Node::Project(p) => p.dependencies.iter().collect(),
            Node::Distribution(d) => d.members.iter().chain(&d.dist_dependencies).collect(),
        }
    }

    /// References that only exist on some platforms.
    pub fn variant_references(&self) -> Vec<&DependencyRef> {
        match self {
            Node::Project(p) => p
                .variants
                .payloads()
                .flat_map(|v| v.add_dependencies.iter())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the node has any platform-specific variants.
    pub fn has_variants(&self) -> bool {
        !self.variant_keys().is_empty()
    }

    /// Declared variant keys as `os/arch` strings.
    pub fn variant_keys(&self) -> Vec<String> {
        match self {
            Node::Library(l) => l.variants.keys(),
            Node::Project(p) => p.variants.keys(),
            Node::Distribution(d) => d.variants.keys(),
        }
    }

    pub fn as_library(&self) -> Option<&Library> {
        match self {
            Node::Library(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_project(&self) -> Option<&Project> {
        match self {
            Node::Project(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_distribution(&self) -> Option<&Distribution> {
        match self {
            Node::Distribution(d) => Some(d),
            _ => None,
        }
    }
}
