//! `berth dist` command

use anyhow::Result;

use super::Globals;
use crate::cli::DistArgs;
use berth::ops::{self, Session};

pub fn execute(args: DistArgs, globals: &Globals) -> Result<()> {
    let (suite, run) = globals.load(&args.platform)?;
    let session = Session::new(run)?;
    let graph = session.resolve(&suite)?;
    let assembly = ops::assemble_distribution(&graph, &args.name, session.run())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&assembly)?);
    } else {
        print!("{}", ops::format_assembly(&assembly));
    }
    Ok(())
}
