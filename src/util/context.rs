//! Global context for berth operations.
//!
//! Provides centralized access to the working directory, the berth home
//! directory and the locations of configuration files and caches.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use thiserror::Error;

/// File names recognized as suite manifests, in lookup order.
pub const MANIFEST_NAMES: [&str; 2] = ["suite.toml", "suite.json"];

/// Environment variable overriding the berth home directory.
pub const HOME_ENV: &str = "BERTH_HOME";

/// Project directories for berth
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("com", "berth", "berth"));

/// Errors locating a suite manifest.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("could not find `suite.toml` or `suite.json` in `{}` or any parent directory", dir.display())]
    NotFound { dir: PathBuf },

    #[error("both `{}` and `{}` exist; remove one of them", toml.display(), json.display())]
    Ambiguous { toml: PathBuf, json: PathBuf },
}

/// Global context containing paths and output preferences.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Home directory for global berth data
    home: PathBuf,

    /// Whether to use verbose output
    verbose: bool,

    /// Whether to use colors in output
    color: bool,
}

impl GlobalContext {
    /// Create a new GlobalContext with defaults.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;

        let home = if let Some(home) = std::env::var_os(HOME_ENV) {
            PathBuf::from(home)
        } else if let Some(dirs) = PROJECT_DIRS.as_ref() {
            dirs.cache_dir().to_path_buf()
        } else {
            BaseDirs::new()
                .map(|b| b.home_dir().join(".berth"))
                .unwrap_or_else(|| PathBuf::from(".berth"))
        };

        Ok(GlobalContext {
            cwd,
            home,
            verbose: false,
            color: true,
        })
    }

    /// Create a GlobalContext with a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.cwd = cwd;
        Ok(ctx)
    }

    /// Override the home directory.
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Set color output.
    pub fn set_color(&mut self, color: bool) {
        self.color = color;
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the berth home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Default cache directory for verified libraries and imported suites.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Get the global configuration file path.
    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// Get the project configuration file path for a suite rooted at `root`.
    pub fn project_config_path(&self, root: &Path) -> PathBuf {
        root.join(".berth").join("config.toml")
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if color output is enabled.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Find the suite manifest starting from cwd and searching upward.
    pub fn find_manifest(&self) -> Result<PathBuf, LocateError> {
        let mut current = self.cwd.clone();
        loop {
            if let Some(found) = manifest_in(&current)? {
                return Ok(found);
            }
            if !current.pop() {
                return Err(LocateError::NotFound {
                    dir: self.cwd.clone(),
                });
            }
        }
    }
}

/// Look for a manifest directly inside `dir`.
pub fn manifest_in(dir: &Path) -> Result<Option<PathBuf>, LocateError> {
    let toml = dir.join(MANIFEST_NAMES[0]);
    let json = dir.join(MANIFEST_NAMES[1]);
    match (toml.is_file(), json.is_file()) {
        (true, true) => Err(LocateError::Ambiguous { toml, json }),
        (true, false) => Ok(Some(toml)),
        (false, true) => Ok(Some(json)),
        (false, false) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_paths() {
        let ctx = GlobalContext::new()
            .unwrap()
            .with_home(PathBuf::from("/tmp/berth-home"));
        assert!(ctx.cwd().is_absolute());
        assert_eq!(ctx.cache_dir(), PathBuf::from("/tmp/berth-home/cache"));
        assert_eq!(ctx.config_path(), PathBuf::from("/tmp/berth-home/config.toml"));
    }

    #[test]
    fn test_find_manifest_walks_upward() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("suite.toml");
        std::fs::write(&manifest, "name = \"demo\"\n").unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = GlobalContext::with_cwd(nested).unwrap();
        assert_eq!(ctx.find_manifest().ok(), Some(manifest));
    }

    #[test]
    fn test_find_manifest_json() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("suite.json");
        std::fs::write(&manifest, "{\"name\": \"demo\"}").unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();
        assert_eq!(ctx.find_manifest().ok(), Some(manifest));
    }

    #[test]
    fn test_find_manifest_ambiguous() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("suite.toml"), "name = \"a\"\n").unwrap();
        std::fs::write(tmp.path().join("suite.json"), "{\"name\": \"b\"}").unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();
        assert!(matches!(
            ctx.find_manifest(),
            Err(LocateError::Ambiguous { .. })
        ));
    }
}
