//! Suite manifest parsing and validation.
//!
//! A manifest is either `suite.toml` or `suite.json`; both share one schema
//! with kebab-case keys. The camelCase keys of legacy manifests
//! (`sourceDirs`, `annotationProcessors`, `distDependencies`, ...) are
//! accepted as aliases, and keys the core has no use for (`checkstyle`,
//! `workingSets`, `jacoco`, ...) are ignored.
//!
//! The loader validates shape only: required fields, hashes, URLs, the kind
//! of locally resolvable references and declared licenses. Whether every
//! reference resolves is decided by the graph builder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::core::dependency::{DepKind, DependencyRef, RefName};
use crate::core::import::{ImportLocation, SuiteImport};
use crate::core::node::{
    Distribution, DistributionVariant, Library, LibraryHash, LibrarySource, LibraryVariant, Node,
    NodeKind, Project, ProjectVariant, NOCHECK,
};
use crate::core::platform::VariantTable;
use crate::core::suite::{License, Repository, Suite};
use crate::util::diagnostic::Diagnostic;
use crate::util::hash::{Checksum, HashAlgorithm};
use crate::util::ordered_map::OrderedMap;

/// A malformed manifest, identifying the offending entry.
#[derive(Debug, Clone, PartialEq, Eq, Error, miette::Diagnostic)]
pub enum ManifestError {
    #[error("failed to read {}: {message}", path.display())]
    #[diagnostic(code(berth::manifest::io))]
    Io { path: PathBuf, message: String },

    #[error("failed to parse {}: {message}", path.display())]
    #[diagnostic(code(berth::manifest::parse))]
    Parse { path: PathBuf, message: String },

    #[error("`{entry}` is missing required field `{field}`")]
    #[diagnostic(code(berth::manifest::missing_field))]
    MissingField { entry: String, field: String },

    #[error("`{entry}` has an invalid `{field}`: {message}")]
    #[diagnostic(code(berth::manifest::invalid_field))]
    InvalidField {
        entry: String,
        field: String,
        message: String,
    },

    #[error("`{entry}` declares `{name}` more than once")]
    #[diagnostic(code(berth::manifest::duplicate))]
    DuplicateName { entry: String, name: String },

    #[error("`{entry}` references `{reference}`, which is a {found} (expected {expected})")]
    #[diagnostic(code(berth::manifest::reference_kind))]
    WrongReferenceKind {
        entry: String,
        reference: String,
        expected: String,
        found: NodeKind,
    },

    #[error("`{entry}` uses undeclared license `{license}`")]
    #[diagnostic(code(berth::manifest::license))]
    UnknownLicense { entry: String, license: String },
}

impl ManifestError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(format!("malformed manifest: {}", self));
        match self {
            ManifestError::Io { path, .. } | ManifestError::Parse { path, .. } => {
                diag.with_location(path.clone())
            }
            ManifestError::MissingField { field, .. } if field.starts_with("sha") => diag
                .with_suggestion("Add the expected digest of the downloaded file")
                .with_suggestion(format!(
                    "Declare `sha1 = \"{}\"` to skip verification",
                    NOCHECK
                )),
            ManifestError::WrongReferenceKind { .. } => diag.with_suggestion(
                "Distributions package projects and libraries; list other distributions under `dist-dependencies`",
            ),
            ManifestError::UnknownLicense { license, .. } => diag.with_suggestion(format!(
                "Declare `{}` in the `licenses` table",
                license
            )),
            _ => diag,
        }
    }
}

type LoadResult<T> = std::result::Result<T, ManifestError>;

/// Load a suite from a manifest file.
pub fn load_suite(path: &Path) -> LoadResult<Suite> {
    let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_suite(&content, path)
}

/// Parse manifest content; the format follows the extension of `path`.
pub fn parse_suite(content: &str, path: &Path) -> LoadResult<Suite> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let parsed: std::result::Result<RawSuite, String> = if is_json {
        serde_json::from_str(content).map_err(|e| e.to_string())
    } else {
        toml::from_str(content).map_err(|e| e.to_string())
    };
    let raw = parsed.map_err(|message| ManifestError::Parse {
        path: path.to_path_buf(),
        message,
    })?;

    let suite = raw.into_suite(path)?;
    tracing::debug!(
        "Loaded suite `{}` with {} entries from {}",
        suite.name(),
        suite.nodes().len(),
        path.display()
    );
    Ok(suite)
}

/// Check that a reference points at a node of an acceptable kind.
///
/// Shared with the graph builder, which applies it to cross-suite targets
/// once the imported suite is available.
pub fn check_reference_kind(
    entry: &str,
    reference: &DependencyRef,
    found: NodeKind,
) -> LoadResult<()> {
    let allowed = allowed_kinds(reference.kind());
    if allowed.contains(&found) {
        return Ok(());
    }
    Err(ManifestError::WrongReferenceKind {
        entry: entry.to_string(),
        reference: reference.target().to_string(),
        expected: allowed
            .iter()
            .map(NodeKind::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        found,
    })
}

fn allowed_kinds(kind: DepKind) -> &'static [NodeKind] {
    match kind {
        DepKind::Plain => &[NodeKind::Library, NodeKind::Project, NodeKind::Distribution],
        DepKind::Generated => &[NodeKind::Project],
        DepKind::Processor => &[NodeKind::Project, NodeKind::Distribution],
        DepKind::Member => &[NodeKind::Project, NodeKind::Library],
        DepKind::Distribution => &[NodeKind::Distribution],
    }
}

/// A boolean that hand-written manifests also spell as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFlag {
    Bool(bool),
    Text(String),
}

fn flag(raw: Option<&RawFlag>, default: bool, entry: &str, field: &str) -> LoadResult<bool> {
    match raw {
        None => Ok(default),
        Some(RawFlag::Bool(b)) => Ok(*b),
        Some(RawFlag::Text(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(invalid(entry, field, format!("`{}` is not a boolean", s))),
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStrings {
    One(String),
    Many(Vec<String>),
}

impl RawStrings {
    fn to_vec(&self) -> Vec<String> {
        match self {
            RawStrings::One(s) => vec![s.clone()],
            RawStrings::Many(v) => v.clone(),
        }
    }
}

fn strings(raw: Option<&RawStrings>) -> Vec<String> {
    raw.map(RawStrings::to_vec).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawSuite {
    name: Option<String>,
    #[serde(alias = "version")]
    revision: Option<String>,
    #[serde(alias = "defaultLicense")]
    default_license: Option<String>,
    imports: Option<RawImports>,
    #[serde(default)]
    repositories: OrderedMap<RawRepository>,
    #[serde(default)]
    licenses: OrderedMap<RawLicense>,
    #[serde(default)]
    libraries: OrderedMap<RawLibrary>,
    #[serde(default)]
    projects: OrderedMap<RawProject>,
    #[serde(default)]
    distributions: OrderedMap<RawDistribution>,
}

/// Imports are a plain list, or nested under `suites` in legacy manifests.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawImports {
    List(Vec<RawImport>),
    Nested { suites: Vec<RawImport> },
}

#[derive(Debug, Deserialize)]
struct RawImport {
    name: Option<String>,
    #[serde(alias = "version")]
    revision: Option<String>,
    #[serde(default)]
    urls: Vec<RawImportUrl>,
}

#[derive(Debug, Deserialize)]
struct RawImportUrl {
    url: String,
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    url: Option<String>,
    licenses: Option<RawStrings>,
}

#[derive(Debug, Deserialize)]
struct RawLicense {
    name: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawLibrary {
    path: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    sha1: Option<String>,
    sha256: Option<String>,
    resource: Option<RawFlag>,
    license: Option<RawStrings>,
    #[serde(default, alias = "os_arch")]
    os_arch: OrderedMap<OrderedMap<RawLibraryVariant>>,
}

#[derive(Debug, Deserialize)]
struct RawLibraryVariant {
    path: Option<String>,
    urls: Option<Vec<String>>,
    sha1: Option<String>,
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawProject {
    #[serde(default, alias = "sourceDirs")]
    source_dirs: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, alias = "annotationProcessors")]
    annotation_processors: Vec<String>,
    #[serde(default, alias = "generatedDependencies")]
    generated_dependencies: Vec<String>,
    #[serde(alias = "javaCompliance")]
    compliance: Option<String>,
    native: Option<RawFlag>,
    class: Option<String>,
    output: Option<String>,
    license: Option<RawStrings>,
    #[serde(default, alias = "os_arch")]
    os_arch: OrderedMap<OrderedMap<RawProjectVariant>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawProjectVariant {
    output: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    remove_dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawDistribution {
    description: Option<String>,
    #[serde(default, alias = "members")]
    dependencies: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default, alias = "distDependencies")]
    dist_dependencies: Vec<String>,
    path: Option<String>,
    #[serde(alias = "subDir")]
    sub_dir: Option<String>,
    #[serde(alias = "mainClass")]
    main_class: Option<String>,
    maven: Option<RawFlag>,
    #[serde(default)]
    maven_exclude: Vec<String>,
    license: Option<RawStrings>,
    #[serde(default, alias = "os_arch")]
    os_arch: OrderedMap<OrderedMap<RawDistributionVariant>>,
}

#[derive(Debug, Deserialize)]
struct RawDistributionVariant {
    path: Option<String>,
}

fn invalid(entry: &str, field: &str, message: impl Into<String>) -> ManifestError {
    ManifestError::InvalidField {
        entry: entry.to_string(),
        field: field.to_string(),
        message: message.into(),
    }
}

fn missing(entry: &str, field: &str) -> ManifestError {
    ManifestError::MissingField {
        entry: entry.to_string(),
        field: field.to_string(),
    }
}

/// Conversion state shared by every entry of one manifest.
struct Loader<'a> {
    suite: &'a str,
}

impl Loader<'_> {
    /// Parse a reference, dropping a qualifier that names this suite.
    fn reference(&self, entry: &str, field: &str, s: &str, kind: DepKind) -> LoadResult<DependencyRef> {
        let target = self.ref_name(entry, field, s)?;
        Ok(DependencyRef::new(target, kind))
    }

    fn ref_name(&self, entry: &str, field: &str, s: &str) -> LoadResult<RefName> {
        let name: RefName = s.parse().map_err(|e: anyhow::Error| invalid(entry, field, e.to_string()))?;
        Ok(match name.suite() {
            Some(suite) if suite == self.suite => RefName::local(name.name()),
            _ => name,
        })
    }

    fn references(
        &self,
        entry: &str,
        field: &str,
        list: &[String],
        kind: DepKind,
    ) -> LoadResult<Vec<DependencyRef>> {
        list.iter()
            .map(|s| self.reference(entry, field, s, kind))
            .collect()
    }

    fn ref_names(&self, entry: &str, field: &str, list: &[String]) -> LoadResult<Vec<RefName>> {
        list.iter().map(|s| self.ref_name(entry, field, s)).collect()
    }

    fn library(&self, name: String, raw: RawLibrary) -> LoadResult<Library> {
        let source = LibrarySource {
            path: raw.path,
            urls: parse_urls(&name, &raw.urls)?,
            hash: parse_hash(&name, raw.sha1.as_deref(), raw.sha256.as_deref())?,
        };
        check_source(&name, &source)?;

        let mut library = Library {
            resource: flag(raw.resource.as_ref(), false, &name, "resource")?,
            source,
            variants: VariantTable::new(),
            name,
        };

        for (os, arches) in raw.os_arch {
            for (arch, v) in arches {
                let entry = variant_entry(&library.name, &os, &arch);
                let variant = LibraryVariant {
                    path: v.path,
                    urls: v.urls.map(|urls| parse_urls(&entry, &urls)).transpose()?,
                    hash: parse_hash(&entry, v.sha1.as_deref(), v.sha256.as_deref())?,
                };
                check_source(&entry, &library.source_with(Some(&variant)))?;
                insert_variant(&mut library.variants, &library.name, &os, &arch, variant)?;
            }
        }

        Ok(library)
    }

    fn project(&self, name: String, raw: RawProject) -> LoadResult<Project> {
        let mut dependencies = self.references(&name, "dependencies", &raw.dependencies, DepKind::Plain)?;
        dependencies.extend(self.references(
            &name,
            "annotation-processors",
            &raw.annotation_processors,
            DepKind::Processor,
        )?);
        dependencies.extend(self.references(
            &name,
            "generated-dependencies",
            &raw.generated_dependencies,
            DepKind::Generated,
        )?);

        let mut variants = VariantTable::new();
        for (os, arches) in raw.os_arch {
            for (arch, v) in arches {
                let entry = variant_entry(&name, &os, &arch);
                let remove = self.ref_names(&entry, "remove-dependencies", &v.remove_dependencies)?;
                if let Some(unknown) = remove
                    .iter()
                    .find(|r| !dependencies.iter().any(|d| d.target() == *r))
                {
                    return Err(invalid(
                        &entry,
                        "remove-dependencies",
                        format!("`{}` is not a dependency of `{}`", unknown, name),
                    ));
                }
                let variant = ProjectVariant {
                    output: v.output,
                    add_dependencies: self.references(&entry, "dependencies", &v.dependencies, DepKind::Plain)?,
                    remove_dependencies: remove,
                };
                insert_variant(&mut variants, &name, &os, &arch, variant)?;
            }
        }

        Ok(Project {
            source_dirs: raw.source_dirs,
            dependencies,
            compliance: raw.compliance,
            native: flag(raw.native.as_ref(), false, &name, "native")?,
            class: raw.class,
            output: raw.output,
            variants,
            name,
        })
    }

    fn distribution(&self, name: String, raw: RawDistribution) -> LoadResult<Distribution> {
        let mut variants = VariantTable::new();
        for (os, arches) in raw.os_arch {
            for (arch, v) in arches {
                insert_variant(&mut variants, &name, &os, &arch, DistributionVariant { path: v.path })?;
            }
        }

        Ok(Distribution {
            description: raw.description,
            members: self.references(&name, "dependencies", &raw.dependencies, DepKind::Member)?,
            exclude: self.ref_names(&name, "exclude", &raw.exclude)?,
            dist_dependencies: self.references(
                &name,
                "dist-dependencies",
                &raw.dist_dependencies,
                DepKind::Distribution,
            )?,
            path: raw.path,
            sub_dir: raw.sub_dir,
            main_class: raw.main_class,
            publish: flag(raw.maven.as_ref(), true, &name, "maven")?,
            publication_exclude: self.ref_names(&name, "maven-exclude", &raw.maven_exclude)?,
            variants,
            name,
        })
    }
}

fn variant_entry(name: &str, os: &str, arch: &str) -> String {
    format!("{} (os-arch {}/{})", name, os, arch)
}

fn insert_variant<T>(
    table: &mut VariantTable<T>,
    entry: &str,
    os: &str,
    arch: &str,
    payload: T,
) -> LoadResult<()> {
    if table.insert(os, arch, payload) {
        Ok(())
    } else {
        Err(ManifestError::DuplicateName {
            entry: entry.to_string(),
            name: format!("os-arch {}/{}", os, arch),
        })
    }
}

fn parse_urls(entry: &str, urls: &[String]) -> LoadResult<Vec<Url>> {
    urls.iter()
        .map(|u| Url::parse(u).map_err(|e| invalid(entry, "urls", format!("`{}`: {}", u, e))))
        .collect()
}

fn parse_hash(entry: &str, sha1: Option<&str>, sha256: Option<&str>) -> LoadResult<Option<LibraryHash>> {
    let (algorithm, digest) = match (sha1, sha256) {
        (Some(_), Some(_)) => {
            return Err(invalid(entry, "sha256", "declare either `sha1` or `sha256`, not both"))
        }
        (Some(d), None) => (HashAlgorithm::Sha1, d),
        (None, Some(d)) => (HashAlgorithm::Sha256, d),
        (None, None) => return Ok(None),
    };

    if digest == NOCHECK {
        return Ok(Some(LibraryHash::Unchecked));
    }
    Checksum::new(algorithm, digest)
        .map(|c| Some(LibraryHash::Checked(c)))
        .map_err(|e| invalid(entry, algorithm.as_str(), e.to_string()))
}

fn check_source(entry: &str, source: &LibrarySource) -> LoadResult<()> {
    if source.path.is_none() && source.urls.is_empty() {
        return Err(missing(entry, "path` or `urls"));
    }
    if !source.urls.is_empty() && source.hash.is_none() {
        return Err(missing(entry, "sha1` or `sha256"));
    }
    Ok(())
}

impl RawSuite {
    fn into_suite(self, path: &Path) -> LoadResult<Suite> {
        let name = self.name.ok_or_else(|| missing("suite", "name"))?;
        let loader = Loader { suite: &name };

        let mut imports: Vec<SuiteImport> = Vec::new();
        let raw_imports = match self.imports {
            Some(RawImports::List(list)) | Some(RawImports::Nested { suites: list }) => list,
            None => Vec::new(),
        };
        for raw in raw_imports {
            let import = convert_import(raw)?;
            if imports.iter().any(|i| i.name == import.name) {
                return Err(ManifestError::DuplicateName {
                    entry: "imports".to_string(),
                    name: import.name,
                });
            }
            imports.push(import);
        }

        let licenses: Vec<License> = self
            .licenses
            .into_iter()
            .map(|(id, raw)| License {
                id,
                name: raw.name,
                url: raw.url,
            })
            .collect();

        let mut repositories = Vec::new();
        let mut license_refs: Vec<(String, String)> = Vec::new();
        for (id, raw) in self.repositories {
            let url = raw.url.ok_or_else(|| missing(&id, "url"))?;
            let repo_licenses = strings(raw.licenses.as_ref());
            license_refs.extend(repo_licenses.iter().map(|l| (id.clone(), l.clone())));
            repositories.push(Repository {
                id,
                url,
                licenses: repo_licenses,
            });
        }
        if let Some(ref license) = self.default_license {
            license_refs.push(("suite".to_string(), license.clone()));
        }

        let mut nodes = Vec::new();
        for (id, raw) in self.libraries {
            license_refs.extend(strings(raw.license.as_ref()).into_iter().map(|l| (id.clone(), l)));
            nodes.push(Node::Library(loader.library(id, raw)?));
        }
        for (id, raw) in self.projects {
            license_refs.extend(strings(raw.license.as_ref()).into_iter().map(|l| (id.clone(), l)));
            nodes.push(Node::Project(loader.project(id, raw)?));
        }
        for (id, raw) in self.distributions {
            license_refs.extend(strings(raw.license.as_ref()).into_iter().map(|l| (id.clone(), l)));
            nodes.push(Node::Distribution(loader.distribution(id, raw)?));
        }

        // Suites that inherit their licenses from an import declare none.
        if !licenses.is_empty() {
            for (entry, license) in license_refs {
                if !licenses.iter().any(|l| l.id == license) {
                    return Err(ManifestError::UnknownLicense { entry, license });
                }
            }
        }

        check_local_references(&nodes)?;

        Ok(Suite::new(
            name,
            self.revision,
            path.to_path_buf(),
            self.default_license,
            licenses,
            repositories,
            imports,
            nodes,
        ))
    }
}

fn convert_import(raw: RawImport) -> LoadResult<SuiteImport> {
    let name = raw.name.ok_or_else(|| missing("imports", "name"))?;
    let revision = raw.revision.ok_or_else(|| missing(&name, "revision"))?;
    let locations = raw
        .urls
        .into_iter()
        .map(|u| {
            let kind = u
                .kind
                .parse()
                .map_err(|e: anyhow::Error| invalid(&name, "urls", e.to_string()))?;
            Ok(ImportLocation { url: u.url, kind })
        })
        .collect::<LoadResult<Vec<_>>>()?;
    if locations.is_empty() {
        return Err(missing(&name, "urls"));
    }
    Ok(SuiteImport {
        name,
        revision,
        locations,
    })
}

/// Check the kind of every reference that resolves inside this suite.
fn check_local_references(nodes: &[Node]) -> LoadResult<()> {
    let mut kinds: HashMap<&str, NodeKind> = HashMap::new();
    for node in nodes {
        kinds.entry(node.name()).or_insert(node.kind());
    }

    for node in nodes {
        for reference in node.references().into_iter().chain(node.variant_references()) {
            if reference.target().suite().is_some() {
                continue;
            }
            if let Some(found) = kinds.get(reference.target().name()) {
                check_reference_kind(node.name(), reference, *found)?;
            }
        }
    }
    Ok(())
}
