//! CLI command implementations

pub mod cache;
pub mod check;
pub mod config;
pub mod fetch;
pub mod install;
pub mod route;

pub use cache::execute as cache;
pub use check::execute as check;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use install::execute as install;
pub use route::execute as route;

use crate::cache::{CacheStorage, DiskStorage};
use crate::cli::args::RequestArgs;
use crate::config::{Config, ConfigManager};
use crate::engine::EngineDeps;
use crate::error::{HavenError, HavenResult};
use crate::http::{Request, RequestMode};
use crate::manifest::WebAppManifest;
use crate::network::{HttpNetwork, Network, OfflineNetwork};
use crate::report::{EventLog, Reporter};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Open the on-disk store configured for this run
async fn open_store(config: &Config) -> HavenResult<Arc<DiskStorage>> {
    let dir = ConfigManager::cache_dir_for(config);
    let quota = config.cache.quota_mb.map(|mb| mb * 1024 * 1024);
    debug!("Opening cache store at {}", dir.display());
    Ok(Arc::new(DiskStorage::open_dir(dir, quota).await?))
}

fn network_for(config: &Config, offline: bool) -> HavenResult<Arc<dyn Network>> {
    if offline {
        return Ok(Arc::new(OfflineNetwork));
    }
    Ok(Arc::new(HttpNetwork::new(&config.network)?))
}

fn reporter_for(config: &Config) -> Arc<Reporter> {
    if config.general.event_log {
        Arc::new(Reporter::with_journal(EventLog::new(
            ConfigManager::event_log_path(),
        )))
    } else {
        Arc::new(Reporter::new())
    }
}

/// Store, network and reporter for commands that run the engine
async fn engine_deps(config: &Config, offline: bool) -> HavenResult<(EngineDeps, Arc<DiskStorage>)> {
    let storage = open_store(config).await?;
    let network = network_for(config, offline)?;
    let deps = EngineDeps::new(storage.clone() as Arc<dyn CacheStorage>, network)
        .with_reporter(reporter_for(config));
    Ok((deps, storage))
}

async fn load_manifest(config: &Config) -> HavenResult<Option<WebAppManifest>> {
    match &config.precache.manifest_file {
        Some(path) => Ok(Some(WebAppManifest::from_file(path).await?)),
        None => Ok(None),
    }
}

/// Build a request from CLI arguments; relative URLs resolve against the scope
fn build_request(config: &Config, args: &RequestArgs) -> HavenResult<Request> {
    let url = match Url::parse(&args.url) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let scope = Url::parse(&config.engine.scope).map_err(|e| HavenError::ScopeInvalid {
                scope: config.engine.scope.clone(),
                reason: e.to_string(),
            })?;
            scope.join(&args.url)?
        }
        Err(e) => return Err(e.into()),
    };

    let mut request = Request::new(args.method, url);
    if args.navigate {
        request.mode = RequestMode::Navigate;
    }
    Ok(request)
}
