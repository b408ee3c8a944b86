//! Haven - Offline request-interception and caching engine
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use haven::cli::{Cli, Commands};
use haven::config::ConfigManager;
use haven::error::HavenResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> HavenResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("haven=warn"),
        1 => EnvFilter::new("haven=info"),
        _ => EnvFilter::new("haven=debug"),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    match cli.command {
        Commands::Check => haven::cli::commands::check(&config).await,
        Commands::Route(args) => haven::cli::commands::route(args, &config).await,
        Commands::Fetch(args) => haven::cli::commands::fetch(args, &config).await,
        Commands::Install(args) => haven::cli::commands::install(args, &config).await,
        Commands::Cache(args) => haven::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            haven::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
