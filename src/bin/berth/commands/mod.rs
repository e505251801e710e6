//! Command implementations

pub mod build;
pub mod cache;
pub mod completions;
pub mod dist;
pub mod fetch;
pub mod order;

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::PlatformArgs;
use berth::core::platform::Platform;
use berth::core::suite::Suite;
use berth::ops;
use berth::util::config::RunConfig;
use berth::util::GlobalContext;

/// Settings every command shares.
pub struct Globals {
    pub ctx: GlobalContext,
    pub manifest: Option<PathBuf>,
}

impl Globals {
    /// The manifest named on the command line, or the nearest one above cwd.
    pub fn manifest_path(&self) -> Result<PathBuf> {
        match &self.manifest {
            Some(path) => Ok(self.ctx.cwd().join(path)),
            None => Ok(self.ctx.find_manifest()?),
        }
    }

    /// Load the suite and the run configuration it builds with.
    pub fn load(&self, platform: &PlatformArgs) -> Result<(Suite, RunConfig)> {
        let manifest_path = self.manifest_path()?;
        let suite = ops::load(&manifest_path)?;
        let run = ops::run_config(&self.ctx, &manifest_path)?;
        let run = apply_platform(run, platform);
        Ok((suite, run))
    }
}

/// `--os`/`--arch` override the configured platform one component at a time.
fn apply_platform(run: RunConfig, args: &PlatformArgs) -> RunConfig {
    if args.os.is_none() && args.arch.is_none() {
        return run;
    }
    let platform = Platform::new(
        args.os.as_deref().unwrap_or(run.platform.os()),
        args.arch.as_deref().unwrap_or(run.platform.arch()),
    );
    run.with_platform(platform)
}
