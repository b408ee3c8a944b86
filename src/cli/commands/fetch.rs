//! Fetch command - run one request through the active worker

use crate::cli::args::FetchArgs;
use crate::cli::commands::{build_request, engine_deps};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{HavenError, HavenResult};
use std::io::{self, Write};
use tracing::debug;

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> HavenResult<()> {
    let request = build_request(config, &args.request)?;
    let (deps, _storage) = engine_deps(config, args.offline).await?;

    let engine = Engine::new(config, None, deps)?;
    engine.resume()?;

    let response = engine.handle_fetch(&request).await?;
    engine.settle().await;
    debug!(status = response.status, source = %response.source, "Fetched");

    let mut stdout = io::stdout().lock();
    let write_err = |e: io::Error| HavenError::io("writing response to stdout", e);
    if args.include {
        writeln!(stdout, "HTTP {} ({})", response.status, response.source).map_err(write_err)?;
        for (name, value) in &response.headers {
            writeln!(stdout, "{}: {}", name, value).map_err(write_err)?;
        }
        writeln!(stdout).map_err(write_err)?;
    }
    stdout.write_all(&response.body).map_err(write_err)?;
    stdout.flush().map_err(write_err)?;

    Ok(())
}
