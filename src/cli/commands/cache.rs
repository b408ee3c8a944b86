//! Cache command - inspect and manage cache buckets

use crate::cache::CacheStorage;
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::cli::commands::{engine_deps, open_store};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::HavenResult;
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::{self, Write};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> HavenResult<()> {
    match args.action {
        CacheAction::List { format } => list_buckets(config, format).await,
        CacheAction::Clear { yes } => clear_buckets(config, yes).await,
        CacheAction::Purge => purge_buckets(config).await,
    }
}

/// One row of `haven cache list`
#[derive(Debug, Serialize)]
struct BucketSummary {
    name: String,
    entries: usize,
    bytes: u64,
    current: bool,
    newest: Option<DateTime<Utc>>,
}

async fn summarize(
    storage: &dyn CacheStorage,
    current: &BTreeSet<String>,
) -> HavenResult<Vec<BucketSummary>> {
    let mut summaries = Vec::new();
    for name in storage.keys().await? {
        let entries = storage.entries(&name).await?;
        summaries.push(BucketSummary {
            current: current.contains(&name),
            entries: entries.len(),
            bytes: entries.iter().map(|e| e.size()).sum(),
            newest: entries.iter().map(|e| e.stored_at).max(),
            name,
        });
    }
    Ok(summaries)
}

async fn list_buckets(config: &Config, format: OutputFormat) -> HavenResult<()> {
    let (deps, storage) = engine_deps(config, true).await?;
    let engine = Engine::new(config, None, deps)?;
    let buckets = summarize(storage.as_ref(), &engine.current_buckets()).await?;

    match format {
        OutputFormat::Table => print_bucket_table(&buckets),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&buckets)?),
        OutputFormat::Plain => {
            for bucket in &buckets {
                println!("{}", bucket.name);
            }
        }
    }

    Ok(())
}

fn print_bucket_table(buckets: &[BucketSummary]) {
    if buckets.is_empty() {
        println!("No cache buckets found.");
        return;
    }

    println!(
        "{:<36} {:>8} {:>10} {:<8} {:<20}",
        "BUCKET", "ENTRIES", "SIZE", "STATE", "UPDATED"
    );
    println!("{}", "-".repeat(86));

    for bucket in buckets {
        let state = if bucket.current {
            style("current").green().to_string()
        } else {
            style("stale").yellow().to_string()
        };
        let updated = bucket
            .newest
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<36} {:>8} {:>10} {:<8} {:<20}",
            bucket.name,
            bucket.entries,
            format_bytes(bucket.bytes),
            state,
            updated
        );
    }

    println!();
    let stale = buckets.iter().filter(|b| !b.current).count();
    println!("Total: {} bucket(s), {} stale", buckets.len(), stale);
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    match bytes {
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

async fn clear_buckets(config: &Config, skip_confirm: bool) -> HavenResult<()> {
    let storage = open_store(config).await?;
    let names = storage.keys().await?;

    if names.is_empty() {
        println!("No cache buckets to clear.");
        return Ok(());
    }

    println!("This will remove {} cache bucket(s):", names.len());
    for name in &names {
        println!("  {} {}", style("•").red(), name);
    }
    println!();

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

    let mut removed = 0;
    for name in &names {
        if storage.delete(name).await? {
            removed += 1;
        }
    }

    println!("{} cleared {} bucket(s)", style("✓").green(), removed);
    Ok(())
}

async fn purge_buckets(config: &Config) -> HavenResult<()> {
    let (deps, _storage) = engine_deps(config, true).await?;
    let engine = Engine::new(config, None, deps)?;
    let report = engine.purge().await;

    if report.deleted.is_empty() && report.failed.is_empty() {
        println!("No stale buckets for {}.", engine.version());
        return Ok(());
    }

    for name in &report.deleted {
        println!("  {} {}", style("✓").green(), name);
    }
    for name in &report.failed {
        println!("  {} {}", style("✗").red(), name);
    }
    println!(
        "Purged {} stale bucket(s), kept {}",
        report.deleted.len(),
        report.kept.len()
    );
    Ok(())
}
