//! `berth fetch` command

use anyhow::Result;

use super::Globals;
use crate::cli::FetchArgs;
use berth::ops::{self, Session};

pub fn execute(args: FetchArgs, globals: &Globals) -> Result<()> {
    let (suite, mut run) = globals.load(&args.platform)?;
    if args.offline {
        run = run.with_offline(true);
    }
    if let Some(jobs) = args.jobs {
        run = run.with_jobs(jobs);
    }

    let session = Session::new(run)?;
    let graph = session.resolve(&suite)?;
    let fetched = ops::fetch(&graph, session.run(), session.fetcher())?;

    for (label, path) in &fetched {
        if globals.ctx.is_verbose() {
            eprintln!("    Verified {} ({})", label, path.display());
        }
    }
    eprintln!("    Finished {} librar{} verified", fetched.len(), if fetched.len() == 1 { "y" } else { "ies" });
    Ok(())
}
