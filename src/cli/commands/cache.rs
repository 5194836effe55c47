//! Cache command - inspect and clear the dependency cache

use crate::cache::{CacheEntry, CacheManager};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::ShipcheckResult;
use crate::fsutil::format_bytes;
use crate::process::CommandSpec;
use crate::ui::{self, UiContext};
use console::style;
use std::io::{self, Write};
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config, ctx: &UiContext) -> ShipcheckResult<()> {
    let install = CommandSpec::from_argv(&config.run.install_command)?;
    let cache = CacheManager::new(&config.cache, install);
    debug!("Cache root {}", cache.root().display());

    match args.action {
        CacheAction::List { format } => list_entries(&cache, format).await,
        CacheAction::Clear { keys, yes } => clear_entries(&cache, ctx, keys, yes).await,
    }
}

async fn list_entries(cache: &CacheManager, format: OutputFormat) -> ShipcheckResult<()> {
    let entries = cache.entries().await?;

    match format {
        OutputFormat::Json => print_entries_json(&entries)?,
        _ if entries.is_empty() => {
            println!("No cache entries in {}.", cache.root().display());
        }
        OutputFormat::Table => print_entries_table(&entries),
        OutputFormat::Plain => print_entries_plain(&entries),
    }

    Ok(())
}

fn print_entries_table(entries: &[CacheEntry]) {
    println!("{:<30} {:>10} {:<20}", "KEY", "SIZE", "MODIFIED");
    println!("{}", "-".repeat(62));

    let mut total = 0;
    for entry in entries {
        let modified = entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<30} {:>10} {:<20}",
            entry.key,
            format_bytes(entry.size_bytes),
            modified
        );
        total += entry.size_bytes;
    }

    println!();
    println!(
        "Total: {} entr{} ({})",
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        format_bytes(total)
    );
}

fn print_entries_json(entries: &[CacheEntry]) -> ShipcheckResult<()> {
    println!("{}", serde_json::to_string_pretty(entries)?);
    Ok(())
}

fn print_entries_plain(entries: &[CacheEntry]) {
    for entry in entries {
        println!("{}", entry.key);
    }
}

async fn clear_entries(
    cache: &CacheManager,
    ctx: &UiContext,
    keys: Vec<String>,
    skip_confirm: bool,
) -> ShipcheckResult<()> {
    let entries = cache.entries().await?;
    let keys_given = !keys.is_empty();

    let targets: Vec<String> = if !keys_given {
        entries.iter().map(|e| e.key.clone()).collect()
    } else {
        keys
    };

    if targets.is_empty() {
        println!("No cache entries to clear.");
        return Ok(());
    }

    println!("This will remove {} cache entr{}:", targets.len(), if targets.len() == 1 { "y" } else { "ies" });
    for key in &targets {
        println!("  {} {}", style("•").red(), key);
    }
    println!();

    if !skip_confirm && !confirm()? {
        println!("Aborted.");
        return Ok(());
    }

    let removed = if keys_given {
        let mut removed = 0;
        for key in &targets {
            if cache.remove(key).await? {
                removed += 1;
            } else {
                ui::step_warn(ctx, &format!("No cache entry named {}", key));
            }
        }
        removed
    } else {
        cache.clear().await?;
        targets.len()
    };

    ui::step_ok(ctx, &format!("Cleared {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" }));
    Ok(())
}

fn confirm() -> ShipcheckResult<bool> {
    print!("Are you sure? [y/N] ");
    let _ = io::stdout().flush();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return Ok(false);
    }
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
