//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// berth - dependency graph resolution and build ordering for suite manifests
#[derive(Parser)]
#[command(name = "berth")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to suite.toml or suite.json (default: search upward from the current directory)
    #[arg(long, global = true, env = "BERTH_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the resolved build order
    Order(OrderArgs),

    /// Show the content of a distribution
    Dist(DistArgs),

    /// Verify and download the libraries of the suite
    Fetch(FetchArgs),

    /// Build the suite or one distribution
    Build(BuildArgs),

    /// Manage the library cache
    Cache(CacheArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Platform selection shared by graph-resolving commands.
#[derive(Args, Default)]
pub struct PlatformArgs {
    /// Operating system to resolve variants for (default: host)
    #[arg(long)]
    pub os: Option<String>,

    /// CPU architecture to resolve variants for (default: host)
    #[arg(long)]
    pub arch: Option<String>,
}

#[derive(Args)]
pub struct OrderArgs {
    #[command(flatten)]
    pub platform: PlatformArgs,

    /// Include nodes of imported suites
    #[arg(long)]
    pub all: bool,

    /// Print the order as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DistArgs {
    /// Distribution name
    pub name: String,

    #[command(flatten)]
    pub platform: PlatformArgs,

    /// Print the assembly as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub platform: PlatformArgs,

    /// Only use libraries already on disk
    #[arg(long)]
    pub offline: bool,

    /// Number of parallel downloads
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Distribution to build (default: every node of the suite)
    pub dist: Option<String>,

    /// Program invoked once per node
    #[arg(long, env = "BERTH_BUILDER")]
    pub builder: PathBuf,

    /// Arguments passed to the builder program
    #[arg(last = true)]
    pub builder_args: Vec<String>,

    #[command(flatten)]
    pub platform: PlatformArgs,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Only use libraries already on disk
    #[arg(long)]
    pub offline: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    /// Progress bar and a summary on stderr
    Human,
    /// One JSON event per line on stdout
    Json,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Print the cache directory
    Path,

    /// List verified libraries in the cache
    List,

    /// Delete the library cache
    Clean,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_passes_trailing_args() {
        let cli = Cli::parse_from([
            "berth", "build", "CORE", "--builder", "make", "-j", "2", "--", "-C", "out",
        ]);
        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.dist.as_deref(), Some("CORE"));
                assert_eq!(args.builder, PathBuf::from("make"));
                assert_eq!(args.jobs, Some(2));
                assert_eq!(args.builder_args, vec!["-C", "out"]);
                assert_eq!(args.message_format, MessageFormat::Human);
            }
            _ => panic!("expected build"),
        }
    }
}
