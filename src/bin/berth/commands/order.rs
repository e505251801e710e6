//! `berth order` command

use anyhow::Result;
use serde::Serialize;

use super::Globals;
use crate::cli::OrderArgs;
use berth::core::node::NodeKind;
use berth::ops::{self, Session};

#[derive(Serialize)]
struct OrderEntry<'a> {
    label: &'a str,
    kind: NodeKind,
    suite: &'a str,
}

pub fn execute(args: OrderArgs, globals: &Globals) -> Result<()> {
    let (suite, run) = globals.load(&args.platform)?;
    let session = Session::new(run)?;
    let graph = session.resolve(&suite)?;
    let order = ops::build_order(&graph, args.all);

    if args.json {
        let entries: Vec<OrderEntry<'_>> = order
            .iter()
            .map(|n| OrderEntry {
                label: &n.label,
                kind: n.kind(),
                suite: &n.suite,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for node in order {
        println!("{} ({})", node.label, node.kind());
    }
    Ok(())
}
