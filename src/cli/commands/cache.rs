//! Cache command - inspect and prune the dependency cache

use crate::cache::{CacheEntry, CacheStatus, DependencyCache};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::context::Fingerprint;
use crate::error::BuildResult;
use chrono::Utc;
use console::style;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> BuildResult<ExitCode> {
    let root = cache_root(config);
    debug!("Cache root: {}", root.display());
    let cache = DependencyCache::open(root, config.cache.ttl()).await?;

    match args.action {
        CacheAction::List { format } => list_entries(&cache, config, format).await?,
        CacheAction::Clear { yes } => clear_entries(&cache, yes).await?,
        CacheAction::Invalidate { fingerprint } => {
            let fp = Fingerprint::parse(&fingerprint)?;
            cache.invalidate(&fp).await?;
            println!("{} invalidated {}", style("✓").green(), fp.short());
        }
    }

    Ok(ExitCode::SUCCESS)
}

pub(crate) fn cache_root(config: &Config) -> PathBuf {
    config
        .cache
        .dir
        .clone()
        .unwrap_or_else(ConfigManager::cache_dir)
}

async fn list_entries(cache: &DependencyCache, config: &Config, format: OutputFormat) -> BuildResult<()> {
    let entries = cache.entries().await?;

    match format {
        OutputFormat::Table => print_table(&entries, config),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.fingerprint);
            }
        }
    }
    Ok(())
}

fn print_table(entries: &[CacheEntry], config: &Config) {
    if entries.is_empty() {
        println!("No cache entries found.");
        return;
    }

    println!(
        "{:<14} {:<28} {:<8} {:<8} {:<20}",
        "FINGERPRINT", "DEPENDENCY", "MANAGER", "STATUS", "VERIFIED"
    );
    println!("{}", "-".repeat(80));

    for entry in entries {
        let expired = Utc::now() - entry.verified_at > config.cache.ttl();
        let status = match entry.status {
            CacheStatus::Valid if expired => style("expired").yellow().to_string(),
            CacheStatus::Valid => style("valid").green().to_string(),
            CacheStatus::Stale => style("stale").yellow().to_string(),
            CacheStatus::Failed => style("failed").red().to_string(),
        };
        let label = if entry.label.is_empty() { "-" } else { entry.label.as_str() };

        println!(
            "{:<14} {:<28} {:<8} {:<8} {:<20}",
            entry.fingerprint.short(),
            label,
            entry.package_manager,
            status,
            entry.verified_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!("Total: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}

async fn clear_entries(cache: &DependencyCache, skip_confirm: bool) -> BuildResult<()> {
    let entries = cache.entries().await?;
    if entries.is_empty() {
        println!("No cache entries to clear.");
        return Ok(());
    }

    println!(
        "This will remove {} cache entr{} from {}",
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        cache.root().display()
    );

    if !skip_confirm {
        print!("Are you sure? [y/N] ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            println!("Failed to read input, aborting.");
            return Ok(());
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let removed = cache.clear().await?;
    println!("{} cleared {} cache entr{}", style("✓").green(), removed, if removed == 1 { "y" } else { "ies" });
    Ok(())
}
