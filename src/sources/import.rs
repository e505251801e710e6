//! Resolution of cross-suite imports.
//!
//! An import names a suite, a pinned revision and fallback locations. The
//! locations are tried in order and the first one yielding a suite at the
//! pinned revision wins. Resolved suites are read-only and cached for the
//! rest of the run.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use git2::{Repository, ResetType};
use thiserror::Error;
use url::Url;

use crate::core::import::{ImportKind, ImportLocation, SuiteImport};
use crate::core::manifest::load_suite;
use crate::core::suite::Suite;
use crate::sources::fetch::Fetcher;
use crate::util::context::manifest_in;
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::fs::{ensure_dir, remove_dir_all_if_exists};

/// Failure to resolve an imported suite.
#[derive(Debug, Clone, PartialEq, Eq, Error, miette::Diagnostic)]
pub enum ImportError {
    #[error("`{importer}` references suite `{suite}`, which it does not import")]
    #[diagnostic(code(berth::import::not_imported))]
    NotImported { importer: String, suite: String },

    #[error("could not resolve suite `{suite}` at revision `{revision}`")]
    #[diagnostic(code(berth::import::unresolved))]
    UnresolvedImport {
        suite: String,
        revision: String,
        attempts: Vec<String>,
    },
}

impl ImportError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ImportError::NotImported { suite, .. } => Diagnostic::error(self.to_string())
                .with_suggestion(format!("Add `{}` to the `imports` list", suite)),
            ImportError::UnresolvedImport { suite, attempts, .. } => {
                let mut diag = Diagnostic::error(self.to_string());
                for attempt in attempts {
                    diag = diag.with_context(attempt.clone());
                }
                diag.with_suggestion(suggestions::FETCH_FAILED).with_suggestion(format!(
                    "Point `[imports.overrides] {}` at a local checkout",
                    suite
                ))
            }
        }
    }
}

/// Supplies imported suites to the graph builder.
pub trait SuiteProvider {
    /// Resolve the suite described by `import`.
    fn provide(&self, import: &SuiteImport) -> Result<Arc<Suite>, ImportError>;
}

/// One way of materializing an imported suite on disk.
trait SuiteSource {
    fn materialize(&self, import: &SuiteImport, url: &str) -> Result<Suite>;
}

/// Checks out a version-control location at the pinned revision.
struct GitSuiteSource {
    root: PathBuf,
    offline: bool,
}

impl GitSuiteSource {
    /// Refuse network access for `url` in offline mode.
    fn check_offline(&self, url: &str) -> Result<()> {
        if self.offline && is_remote(url) {
            bail!("offline mode is enabled");
        }
        Ok(())
    }

    fn checkout_dir(&self, import: &SuiteImport, url: &str) -> PathBuf {
        let sanitized: String = url
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        let tail = &sanitized[sanitized.len().saturating_sub(48)..];
        self.root.join(format!("{}-{}", import.name, tail.trim_matches('-')))
    }
}

impl SuiteSource for GitSuiteSource {
    fn materialize(&self, import: &SuiteImport, url: &str) -> Result<Suite> {
        let dir = self.checkout_dir(import, url);

        let repo = if dir.join(".git").exists() {
            let repo = Repository::open(&dir)
                .with_context(|| format!("failed to open {}", dir.display()))?;
            if repo.revparse_single(&import.revision).is_err() {
                self.check_offline(url)?;
                tracing::info!("Updating {} from {}", import.name, url);
                let mut remote = repo.find_remote("origin")?;
                remote
                    .fetch(&["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"], None, None)
                    .with_context(|| format!("failed to fetch {}", url))?;
            }
            repo
        } else {
            self.check_offline(url)?;
            tracing::info!("Cloning {} from {}", import.name, url);
            remove_dir_all_if_exists(&dir)?;
            if let Some(parent) = dir.parent() {
                ensure_dir(parent)?;
            }
            Repository::clone(url, &dir).with_context(|| format!("failed to clone {}", url))?
        };

        let commit = repo
            .revparse_single(&import.revision)
            .and_then(|obj| obj.peel_to_commit())
            .with_context(|| format!("revision `{}` not found in {}", import.revision, url))?;
        repo.reset(commit.as_object(), ResetType::Hard, None)
            .with_context(|| format!("failed to check out `{}`", import.revision))?;

        let suite = load_materialized(&dir)?;
        Ok(suite.with_revision(commit.id().to_string()))
    }
}

/// Whether cloning or fetching `url` needs the network.
fn is_remote(url: &str) -> bool {
    match Url::parse(url) {
        // Single-letter schemes are Windows drive letters.
        Ok(parsed) => parsed.scheme() != "file" && parsed.scheme().len() > 1,
        Err(_) => !Path::new(url).exists(),
    }
}

/// Downloads and unpacks `<url>/<name>-<revision>.tar.gz`.
struct BinarySuiteSource {
    root: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl SuiteSource for BinarySuiteSource {
    fn materialize(&self, import: &SuiteImport, url: &str) -> Result<Suite> {
        let dir = self
            .root
            .join(format!("{}-{}", import.name, import.revision));

        if manifest_in(&dir).ok().flatten().is_none() {
            let archive_url = format!(
                "{}/{}-{}.tar.gz",
                url.trim_end_matches('/'),
                import.name,
                import.revision
            );
            let archive_url =
                Url::parse(&archive_url).with_context(|| format!("invalid URL `{}`", archive_url))?;

            ensure_dir(&self.root)?;
            let archive = tempfile::NamedTempFile::new_in(&self.root)?;
            self.fetcher.fetch(&archive_url, archive.path())?;

            let staging = tempfile::TempDir::new_in(&self.root)?;
            extract_archive(archive.path(), staging.path())
                .with_context(|| format!("failed to extract {}", archive_url))?;

            remove_dir_all_if_exists(&dir)?;
            std::fs::rename(snapshot_root(staging.path())?, &dir)
                .with_context(|| format!("failed to move snapshot to {}", dir.display()))?;
        } else {
            tracing::debug!("Using cached snapshot of `{}` at {}", import.name, dir.display());
        }

        let suite = load_materialized(&dir)?;
        match suite.revision() {
            Some(actual) if !import.accepts(actual) => bail!(
                "snapshot declares revision `{}`, expected `{}`",
                actual,
                import.revision
            ),
            Some(_) => Ok(suite),
            None => Ok(suite.with_revision(import.revision.clone())),
        }
    }
}

fn load_materialized(dir: &Path) -> Result<Suite> {
    let manifest = manifest_in(dir)?
        .with_context(|| format!("no suite manifest in {}", dir.display()))?;
    Ok(load_suite(&manifest)?)
}

/// Snapshots may wrap the suite in a single top-level directory.
fn snapshot_root(staging: &Path) -> Result<PathBuf> {
    if manifest_in(staging)?.is_some() {
        return Ok(staging.to_path_buf());
    }
    let dirs: Vec<PathBuf> = std::fs::read_dir(staging)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    match dirs.as_slice() {
        [only] if manifest_in(only)?.is_some() => Ok(only.clone()),
        _ => bail!("snapshot does not contain a suite manifest"),
    }
}

/// Extract a gzip-compressed tarball into `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let file = std::fs::File::open(archive)
        .with_context(|| format!("failed to open {}", archive.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    ensure_dir(dest)?;
    archive
        .unpack(dest)
        .with_context(|| format!("failed to unpack into {}", dest.display()))?;
    Ok(())
}

/// Resolves and caches imported suites for one run.
pub struct ImportResolver {
    git: GitSuiteSource,
    binary: BinarySuiteSource,
    overrides: BTreeMap<String, PathBuf>,
    loaded: Mutex<HashMap<String, (String, Arc<Suite>)>>,
}

impl ImportResolver {
    /// `cache_dir` is the suite cache; `overrides` map suite names to local checkouts.
    pub fn new(
        cache_dir: &Path,
        fetcher: Arc<dyn Fetcher>,
        overrides: BTreeMap<String, PathBuf>,
    ) -> Self {
        ImportResolver {
            git: GitSuiteSource {
                root: cache_dir.join("git"),
                offline: false,
            },
            binary: BinarySuiteSource {
                root: cache_dir.join("binary"),
                fetcher,
            },
            overrides,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Refuse to clone or fetch remote repositories. Existing checkouts that
    /// already contain the pinned revision are still used.
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.git.offline = offline;
        self
    }

    fn resolve(&self, import: &SuiteImport) -> Result<Suite, ImportError> {
        let mut attempts = Vec::new();

        if let Some(dir) = self.overrides.get(&import.name) {
            match load_materialized(dir) {
                Ok(suite) => {
                    if let Some(actual) = suite.revision().filter(|r| !import.accepts(r)) {
                        tracing::warn!(
                            "Local override of `{}` is at `{}`, not the pinned `{}`",
                            import.name,
                            actual,
                            import.revision
                        );
                    }
                    return check_name(import, suite).map_err(|e| unresolved(import, vec![e]));
                }
                Err(e) => attempts.push(format!("override {}: {:#}", dir.display(), e)),
            }
        }

        for ImportLocation { url, kind } in &import.locations {
            let source: &dyn SuiteSource = match kind {
                ImportKind::Git => &self.git,
                ImportKind::Binary => &self.binary,
            };
            match source
                .materialize(import, url)
                .and_then(|suite| check_name(import, suite).map_err(anyhow::Error::msg))
            {
                Ok(suite) => {
                    tracing::debug!("Resolved `{}` from {} ({})", import.name, url, kind);
                    return Ok(suite);
                }
                Err(e) => {
                    tracing::warn!("Import `{}` failed from {} ({}): {:#}", import.name, url, kind, e);
                    attempts.push(format!("{} ({}): {:#}", url, kind, e));
                }
            }
        }

        Err(unresolved(import, attempts))
    }
}

fn check_name(import: &SuiteImport, suite: Suite) -> std::result::Result<Suite, String> {
    if suite.name() != import.name {
        return Err(format!(
            "manifest declares suite `{}`, expected `{}`",
            suite.name(),
            import.name
        ));
    }
    Ok(suite)
}

fn unresolved(import: &SuiteImport, attempts: Vec<String>) -> ImportError {
    ImportError::UnresolvedImport {
        suite: import.name.clone(),
        revision: import.revision.clone(),
        attempts,
    }
}

impl SuiteProvider for ImportResolver {
    fn provide(&self, import: &SuiteImport) -> Result<Arc<Suite>, ImportError> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((revision, suite)) = loaded.get(&import.name) {
            if *revision != import.revision {
                tracing::warn!(
                    "Suite `{}` is imported at both `{}` and `{}`; using `{}`",
                    import.name,
                    revision,
                    import.revision,
                    revision
                );
            }
            return Ok(suite.clone());
        }

        let suite = Arc::new(self.resolve(import)?);
        loaded.insert(import.name.clone(), (import.revision.clone(), suite.clone()));
        Ok(suite)
    }
}
