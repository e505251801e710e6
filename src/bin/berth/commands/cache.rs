//! `berth cache` command
//!
//! Inspect or delete the library cache.

use anyhow::Result;

use super::Globals;
use crate::cli::{CacheArgs, CacheCommands};
use berth::ops;
use berth::sources::LibraryCache;

pub fn execute(args: CacheArgs, globals: &Globals) -> Result<()> {
    let cache = LibraryCache::new(cache_root(globals).join("libraries"));
    match args.command {
        CacheCommands::Path => {
            println!("{}", cache.root().display());
        }
        CacheCommands::List => {
            let entries = cache.list();
            if entries.is_empty() {
                println!("(empty)");
            }
            for entry in &entries {
                println!(
                    "{}:{}  {}  ({})",
                    entry.algorithm.as_str(),
                    entry.digest,
                    entry.path.display(),
                    format_size(entry.size)
                );
            }
        }
        CacheCommands::Clean => {
            let freed = cache.clean()?;
            eprintln!("     Removed {} ({})", cache.root().display(), format_size(freed));
        }
    }
    Ok(())
}

/// The configured cache directory, honoring a suite's config when one is found.
fn cache_root(globals: &Globals) -> std::path::PathBuf {
    globals
        .manifest_path()
        .and_then(|manifest| ops::run_config(&globals.ctx, &manifest))
        .map(|run| run.cache_dir)
        .unwrap_or_else(|_| globals.ctx.cache_dir())
}

/// Format a byte size for display.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }
}
