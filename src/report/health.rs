//! Installability self-check and readiness score

use crate::cache::CacheStorage;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::manifest::{WebAppManifest, DEFAULT_ICON_SIZES};
use serde::Serialize;
use url::Url;

const WEIGHT_ENGINE: u32 = 30;
const WEIGHT_MANIFEST: u32 = 25;
const WEIGHT_ICONS: u32 = 15;
const WEIGHT_OFFLINE: u32 = 15;
const WEIGHT_HTTPS: u32 = 15;
const ERROR_PENALTY: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthChecks {
    pub engine: bool,
    pub manifest: bool,
    pub icons: bool,
    pub offline: bool,
    pub https: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthStatus {
    pub checks: HealthChecks,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.checks.engine && self.checks.manifest && self.checks.https && self.errors.is_empty()
    }

    /// Weighted score of passed checks, minus a penalty per error, in 0..=100
    pub fn readiness_score(&self) -> u32 {
        let c = &self.checks;
        let passed = [
            (c.engine, WEIGHT_ENGINE),
            (c.manifest, WEIGHT_MANIFEST),
            (c.icons, WEIGHT_ICONS),
            (c.offline, WEIGHT_OFFLINE),
            (c.https, WEIGHT_HTTPS),
        ]
        .iter()
        .filter(|(ok, _)| *ok)
        .map(|(_, weight)| weight)
        .sum::<u32>();

        let penalty = ERROR_PENALTY.saturating_mul(self.errors.len() as u32);
        passed.saturating_sub(penalty).min(100)
    }
}

/// Run every check against a config, its manifest and (optionally) the store
pub async fn check(
    config: &Config,
    manifest: Option<&WebAppManifest>,
    storage: Option<&dyn CacheStorage>,
) -> HealthStatus {
    let mut status = HealthStatus::default();

    let scope = match Url::parse(&config.engine.scope) {
        Ok(scope) => Some(scope),
        Err(e) => {
            status.errors.push(format!("engine.scope is not a URL: {}", e));
            None
        }
    };

    match Classifier::from_config(&config.rules) {
        Ok(_) if scope.is_some() => status.checks.engine = true,
        Ok(_) => {}
        Err(e) => status.errors.push(e.to_string()),
    }

    if let Some(scope) = &scope {
        status.checks.https = scope.scheme() == "https"
            || matches!(scope.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
        if !status.checks.https {
            status.errors.push("scope must be served over HTTPS or from localhost".to_string());
        }
    }

    match manifest {
        Some(manifest) => {
            let problems = manifest.problems();
            status.checks.manifest = problems.is_empty();
            for problem in problems {
                status.errors.push(format!("manifest: {}", problem));
            }

            status.checks.icons = !manifest.icons.is_empty();
            if status.checks.icons && manifest.default_icons().is_empty() {
                status.warnings.push(format!(
                    "Missing recommended icon sizes ({})",
                    DEFAULT_ICON_SIZES.join(", ")
                ));
            }
        }
        None => status
            .errors
            .push("no manifest (set precache.manifest_file)".to_string()),
    }

    status.checks.offline = match (&scope, storage) {
        (Some(scope), Some(storage)) => offline_document_cached(config, scope, storage).await,
        _ => false,
    };
    if !status.checks.offline {
        status.warnings.push(format!(
            "Offline document {} is not cached yet (run: haven install)",
            config.engine.offline_document
        ));
    }

    status
}

async fn offline_document_cached(config: &Config, scope: &Url, storage: &dyn CacheStorage) -> bool {
    let Ok(url) = scope.join(&config.engine.offline_document) else {
        return false;
    };
    let bucket = crate::cache::bucket_name(&config.precache.bucket, &config.engine.version);
    matches!(
        storage.get(&bucket, &crate::http::cache_key(&url)).await,
        Ok(Some(_))
    )
}
