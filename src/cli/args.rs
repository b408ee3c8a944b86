//! CLI argument definitions using clap derive

use crate::http::Method;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Haven - Offline request-interception and caching engine
///
/// Routes requests through a caching rule table and serves them from an
/// on-disk store when the network is unavailable.
#[derive(Parser, Debug)]
#[command(name = "haven")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "HAVEN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check installability and print a readiness score
    Check,

    /// Show how a request would be routed
    Route(RequestArgs),

    /// Run one request through the active worker
    Fetch(FetchArgs),

    /// Install and activate the configured version
    Install(InstallArgs),

    /// Inspect or clear cache buckets
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Request description shared by route and fetch
#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// Absolute URL, or a path resolved against engine.scope
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    pub method: Method,

    /// Treat the request as a document navigation
    #[arg(short, long)]
    pub navigate: bool,
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Never touch the network
    #[arg(long)]
    pub offline: bool,

    /// Print status and headers before the body
    #[arg(short, long)]
    pub include: bool,
}

/// Arguments for the install command
#[derive(Parser, Debug)]
pub struct InstallArgs {
    /// Skip the network; seeding fails but activation still runs
    #[arg(long)]
    pub offline: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache buckets
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Delete every cache bucket
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete buckets that don't belong to the configured version
    Purge,
}

fn parse_method(s: &str) -> Result<Method, String> {
    s.parse().map_err(|e: crate::error::HavenError| e.to_string())
}
