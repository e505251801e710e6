//! berth CLI - resolve, order and build suite manifests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use berth::builder::report::{EXIT_FAILURE, EXIT_RESOLVE_ERROR};
use berth::core::manifest::ManifestError;
use berth::resolver::GraphError;
use berth::sources::{ImportError, VerifyError};
use berth::util::context::LocateError;
use berth::util::diagnostic::{emit, suggestions, Diagnostic};
use berth::util::GlobalContext;
use cli::{Cli, Commands};
use commands::Globals;

fn main() {
    // Parse CLI
    let cli = Cli::parse();
    let color = !cli.no_color;

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("berth=debug")
    } else {
        EnvFilter::new("berth=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => report(&e, color),
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let mut ctx = GlobalContext::new()?;
    ctx.set_verbose(cli.verbose);
    ctx.set_color(!cli.no_color);
    let globals = Globals {
        ctx,
        manifest: cli.manifest,
    };

    // Execute command
    match cli.command {
        Commands::Order(args) => commands::order::execute(args, &globals).map(|()| 0),
        Commands::Dist(args) => commands::dist::execute(args, &globals).map(|()| 0),
        Commands::Fetch(args) => commands::fetch::execute(args, &globals).map(|()| 0),
        Commands::Build(args) => {
            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
                tracing::warn!("Failed to install Ctrl-C handler: {}", e);
            }
            commands::build::execute(args, &globals, cancel)
        }
        Commands::Cache(args) => commands::cache::execute(args, &globals).map(|()| 0),
        Commands::Completions(args) => commands::completions::execute(args).map(|()| 0),
    }
}

/// Print `err` and pick the exit code: errors raised while loading and
/// resolving the suite mean nothing was built.
fn report(err: &anyhow::Error, color: bool) -> i32 {
    match diagnose(err) {
        Some(diag) => {
            emit(&diag, color);
            EXIT_RESOLVE_ERROR
        }
        None => {
            eprintln!("error: {:#}", err);
            EXIT_FAILURE
        }
    }
}

fn diagnose(err: &anyhow::Error) -> Option<Diagnostic> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<GraphError>() {
            Some(e.to_diagnostic())
        } else if let Some(e) = cause.downcast_ref::<ManifestError>() {
            Some(e.to_diagnostic())
        } else if let Some(e) = cause.downcast_ref::<ImportError>() {
            Some(e.to_diagnostic())
        } else if let Some(e) = cause.downcast_ref::<VerifyError>() {
            Some(e.to_diagnostic())
        } else {
            cause
                .downcast_ref::<LocateError>()
                .map(|e| Diagnostic::error(e.to_string()).with_suggestion(suggestions::NO_MANIFEST))
        }
    })
}
