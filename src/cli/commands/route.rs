//! Route command - show the routing decision for a request

use crate::cache::MemoryStorage;
use crate::cli::args::RequestArgs;
use crate::cli::commands::build_request;
use crate::config::Config;
use crate::engine::{Engine, EngineDeps, Route};
use crate::error::HavenResult;
use crate::network::OfflineNetwork;
use crate::strategy::StrategyKind;
use console::style;
use std::sync::Arc;

/// Execute the route command
pub async fn execute(args: RequestArgs, config: &Config) -> HavenResult<()> {
    let request = build_request(config, &args)?;

    // Routing needs no store or network; an in-memory engine is enough
    let deps = EngineDeps::new(Arc::new(MemoryStorage::new()), Arc::new(OfflineNetwork));
    let engine = Engine::new(config, None, deps)?;
    engine.resume()?;

    let mode = if request.is_navigation() { " (navigate)" } else { "" };
    println!("{} {}{}", style(request.method).bold(), request.url, mode);

    match engine.route(&request) {
        Route::PassThrough(reason) => {
            println!("  {} {}", style("pass-through:").yellow(), reason);
        }
        Route::Intercept(rule) => {
            let options = engine.options_for(rule);
            println!("  rule:     {} ({})", style(rule.name()).cyan(), rule.group());
            if let Some(kind) = rule.handler() {
                println!("  strategy: {}", kind);
                if kind == StrategyKind::NetworkFirst {
                    println!("  timeout:  {}s", options.network_timeout.as_secs());
                }
            }
            if let Some(bucket) = &options.bucket {
                println!("  bucket:   {}", bucket);
            }
            let limits: Vec<String> = [
                options.expiration.max_entries.map(|n| format!("{} entries", n)),
                options.expiration.max_age_seconds.map(|s| format!("{}s max age", s)),
            ]
            .into_iter()
            .flatten()
            .collect();
            if !limits.is_empty() {
                println!("  limits:   {}", limits.join(", "));
            }
        }
    }

    Ok(())
}
