//! Install command - install, seed and activate the configured version

use crate::cache::CacheStorage;
use crate::cli::args::InstallArgs;
use crate::cli::commands::{engine_deps, load_manifest};
use crate::config::Config;
use crate::error::{HavenError, HavenResult};
use crate::lifecycle::Registration;
use console::{style, Emoji};
use std::collections::BTreeSet;

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "[FAIL] ");

/// Execute the install command
pub async fn execute(args: InstallArgs, config: &Config) -> HavenResult<()> {
    let manifest = load_manifest(config).await?;
    let (deps, storage) = engine_deps(config, args.offline).await?;
    let before: BTreeSet<String> = storage.keys().await?.into_iter().collect();

    let scope = url::Url::parse(&config.engine.scope).map_err(|e| HavenError::ScopeInvalid {
        scope: config.engine.scope.clone(),
        reason: e.to_string(),
    })?;
    let registration = Registration::new(scope, deps);
    let worker = registration.create_worker(config, manifest.as_ref())?;

    println!(
        "{} {} ({} URLs)",
        style("Installing").bold().cyan(),
        worker.version(),
        worker.precache_urls().len()
    );
    let report = registration.register(worker.clone()).await?;

    for url in &report.seeded {
        println!("  {} {}", CHECK, url);
    }
    for url in &report.failed {
        println!("  {} {}", CROSS, style(url).red());
    }

    let after: BTreeSet<String> = storage.keys().await?.into_iter().collect();
    let purged: Vec<&String> = before.difference(&after).collect();
    if !purged.is_empty() {
        println!();
        println!("Purged {} stale bucket(s):", purged.len());
        for bucket in purged {
            println!("  {} {}", style("•").red(), bucket);
        }
    }

    println!();
    println!(
        "{} {} is active ({}/{} seeded into {})",
        style("✓").green(),
        worker.version(),
        report.seeded.len(),
        report.seeded.len() + report.failed.len(),
        report.bucket
    );

    Ok(())
}
