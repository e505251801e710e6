//! Configuration file support for berth.
//!
//! Two configuration file locations are read:
//! - Global: `$BERTH_HOME/config.toml` - User-wide defaults
//! - Project: `.berth/config.toml` next to the suite manifest
//!
//! Project config takes precedence over global config, and command-line
//! flags take precedence over both. The merged result is turned into a
//! [`RunConfig`], the run-wide settings every component receives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::platform::Platform;
use crate::util::context::GlobalContext;

/// Default output directory, relative to the suite directory.
pub const DEFAULT_OUTPUT_DIR: &str = "build";

/// berth configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build settings
    pub build: BuildConfig,

    /// Target platform settings
    pub target: TargetConfig,

    /// Library cache settings
    pub cache: CacheConfig,

    /// Network settings
    pub net: NetConfig,

    /// Suite import settings
    pub imports: ImportsConfig,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BuildConfig {
    /// Default number of parallel jobs (None = auto-detect)
    pub jobs: Option<usize>,

    /// Where node outputs and assembled distributions are written
    pub output_dir: Option<PathBuf>,
}

/// Target platform; unset fields default to the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub os: Option<String>,
    pub arch: Option<String>,
}

/// Library cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root (default: `$BERTH_HOME/cache`)
    pub dir: Option<PathBuf>,
}

/// Network-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Offline mode (don't fetch from network)
    pub offline: bool,
}

/// Suite import configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportsConfig {
    /// Local checkouts used instead of fetching, keyed by suite name
    pub overrides: BTreeMap<String, PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    ///
    /// Relative paths in `other` are resolved against `base_dir`, the
    /// directory the file was read from.
    pub fn merge(&mut self, other: Config, base_dir: &Path) {
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if let Some(dir) = other.build.output_dir {
            self.build.output_dir = Some(base_dir.join(dir));
        }

        if other.target.os.is_some() {
            self.target.os = other.target.os;
        }
        if other.target.arch.is_some() {
            self.target.arch = other.target.arch;
        }

        if let Some(dir) = other.cache.dir {
            self.cache.dir = Some(base_dir.join(dir));
        }

        if other.net.offline {
            self.net.offline = true;
        }

        for (suite, path) in other.imports.overrides {
            self.imports.overrides.insert(suite, base_dir.join(path));
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.berth/config.toml)
/// 2. Global config ($BERTH_HOME/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    for path in [global_path, project_path] {
        if path.exists() {
            let layer = Config::load_or_default(path);
            // `.berth/config.toml` paths are relative to the suite, not `.berth/`
            let base = path
                .parent()
                .map(|dir| {
                    if dir.file_name().is_some_and(|n| n == ".berth") {
                        dir.parent().unwrap_or(dir)
                    } else {
                        dir
                    }
                })
                .unwrap_or(Path::new("."));
            config.merge(layer, base);
        }
    }

    config
}

/// Run-wide settings threaded through every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// The (OS, architecture) pair variants are resolved for.
    pub platform: Platform,
    /// Maximum concurrent build jobs.
    pub jobs: usize,
    /// Root of the verified-library and imported-suite cache.
    pub cache_dir: PathBuf,
    /// Root of node outputs and assembled distributions.
    pub output_dir: PathBuf,
    /// Refuse every remote transfer.
    pub offline: bool,
    /// Local suite checkouts used instead of import locations.
    pub import_overrides: BTreeMap<String, PathBuf>,
}

impl RunConfig {
    /// Defaults for a suite rooted at `suite_dir`, targeting the host.
    pub fn for_suite(suite_dir: &Path, cache_dir: PathBuf) -> Self {
        RunConfig {
            platform: Platform::host(),
            jobs: default_jobs(),
            cache_dir,
            output_dir: suite_dir.join(DEFAULT_OUTPUT_DIR),
            offline: false,
            import_overrides: BTreeMap::new(),
        }
    }

    /// Resolve the merged configuration for a suite rooted at `suite_dir`.
    pub fn from_config(config: &Config, ctx: &GlobalContext, suite_dir: &Path) -> Self {
        let host = Platform::host();
        let platform = Platform::new(
            config.target.os.as_deref().unwrap_or(host.os()),
            config.target.arch.as_deref().unwrap_or(host.arch()),
        );

        RunConfig {
            platform,
            jobs: config.build.jobs.filter(|j| *j > 0).unwrap_or_else(default_jobs),
            cache_dir: config.cache.dir.clone().unwrap_or_else(|| ctx.cache_dir()),
            output_dir: config
                .build
                .output_dir
                .clone()
                .unwrap_or_else(|| suite_dir.join(DEFAULT_OUTPUT_DIR)),
            offline: config.net.offline,
            import_overrides: config.imports.overrides.clone(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Directory where verified libraries are stored.
    pub fn library_cache(&self) -> PathBuf {
        self.cache_dir.join("libraries")
    }

    /// Directory where imported suites are materialized.
    pub fn suite_cache(&self) -> PathBuf {
        self.cache_dir.join("suites")
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
