//! Check command - installability health check

use crate::cache::CacheStorage;
use crate::cli::commands::{load_manifest, open_store};
use crate::config::Config;
use crate::error::HavenResult;
use crate::report::health;
use console::{style, Emoji};

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "[FAIL] ");
static WARN: Emoji<'_, '_> = Emoji("⚠ ", "[WARN] ");

/// Execute the check command
pub async fn execute(config: &Config) -> HavenResult<()> {
    println!("{}", style("Haven Health Check").bold().cyan());
    println!();

    let mut load_errors = Vec::new();
    let manifest = match load_manifest(config).await {
        Ok(manifest) => manifest,
        Err(e) => {
            load_errors.push(e.to_string());
            None
        }
    };
    let storage = match open_store(config).await {
        Ok(storage) => Some(storage),
        Err(e) => {
            load_errors.push(e.to_string());
            None
        }
    };

    let mut status = health::check(
        config,
        manifest.as_ref(),
        storage.as_deref().map(|s| s as &dyn CacheStorage),
    )
    .await;
    status.errors.extend(load_errors);

    println!("{}", style("Checks:").bold());
    print_check("Engine rules", status.checks.engine);
    print_check("Manifest", status.checks.manifest);
    print_check("Icons", status.checks.icons);
    print_check("Offline document", status.checks.offline);
    print_check("HTTPS", status.checks.https);

    if !status.warnings.is_empty() {
        println!();
        for warning in &status.warnings {
            println!("  {} {}", WARN, style(warning).yellow());
        }
    }
    if !status.errors.is_empty() {
        println!();
        for error in &status.errors {
            println!("  {} {}", CROSS, style(error).red());
        }
    }

    println!();
    let score = status.readiness_score();
    let score_style = match score {
        80.. => style(score).green().bold(),
        50..=79 => style(score).yellow().bold(),
        _ => style(score).red().bold(),
    };
    println!("Readiness score: {}/100", score_style);

    if status.is_healthy() {
        println!("{}", style("All critical checks passed").green().bold());
    } else {
        println!(
            "{}",
            style("Some checks failed - see above for details").yellow().bold()
        );
    }

    Ok(())
}

fn print_check(name: &str, passed: bool) {
    if passed {
        println!("  {} {}", CHECK, name);
    } else {
        println!("  {} {}", CROSS, style(name).red());
    }
}
