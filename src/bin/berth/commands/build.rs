//! `berth build` command

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;

use super::Globals;
use crate::cli::{BuildArgs, MessageFormat};
use berth::builder::{CommandNodeBuilder, EventSink, JsonLines};
use berth::ops::{self, BuildOptions, Session};

/// Returns the process exit code the build maps to.
pub fn execute(args: BuildArgs, globals: &Globals, cancel: Arc<AtomicBool>) -> Result<i32> {
    let (suite, mut run) = globals.load(&args.platform)?;
    if let Some(jobs) = args.jobs {
        run = run.with_jobs(jobs);
    }
    if args.offline {
        run = run.with_offline(true);
    }

    let session = Session::new(run)?;
    let builder = CommandNodeBuilder::new(&args.builder, args.builder_args);

    let json = args.message_format == MessageFormat::Json;
    let sink = JsonLines::new(io::stdout());
    let opts = BuildOptions {
        distribution: args.dist,
        progress: !json,
        events: if json { Some(&sink as &dyn EventSink) } else { None },
    };

    let report = ops::build(&suite, &session, &builder, &opts, cancel)?;

    if !json {
        eprint!("{}", report.render(globals.ctx.is_verbose()));
    }
    Ok(report.outcome().exit_code())
}
