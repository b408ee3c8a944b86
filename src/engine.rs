//! The worker engine
//!
//! One `Engine` is one worker version. It owns the compiled rule table and
//! the strategy executor, seeds the static bucket on install, purges other
//! buckets on activate, and answers intercepted requests once active.

use crate::cache::{bucket_name, is_valid_bucket_name, CacheEntry, CacheStorage, Expiration};
use crate::classifier::{Classifier, Rule};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{HavenError, HavenResult};
use crate::http::{Request, Response};
use crate::lifecycle::LifecycleState;
use crate::manifest::WebAppManifest;
use crate::network::Network;
use crate::report::{ErrorContext, EventKind, Reporter};
use crate::strategy::{OfflineFallback, StrategyExecutor, StrategyKind, StrategyOptions};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Collaborators shared by every worker of a scope
#[derive(Clone)]
pub struct EngineDeps {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub clock: Arc<dyn Clock>,
    pub reporter: Arc<Reporter>,
    /// Held exclusively by the enumerate-then-delete activation pass and
    /// shared by strategy cache writes
    pub activation_lock: Arc<RwLock<()>>,
}

impl EngineDeps {
    pub fn new(storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            storage,
            network,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(Reporter::new()),
            activation_lock: Arc::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<Reporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

/// Why a request goes straight to the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassReason {
    NotActive,
    CrossOrigin,
    Bypassed(String),
    Unmatched,
}

impl fmt::Display for PassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotActive => write!(f, "worker not active"),
            Self::CrossOrigin => write!(f, "cross-origin"),
            Self::Bypassed(rule) => write!(f, "bypass rule '{}'", rule),
            Self::Unmatched => write!(f, "no matching rule"),
        }
    }
}

/// Routing decision for one request
#[derive(Debug)]
pub enum Route<'a> {
    PassThrough(PassReason),
    Intercept(&'a Rule),
}

/// Outcome of the install-time precache pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub bucket: String,
    pub seeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Outcome of a purge pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Engine {
    id: Uuid,
    version: String,
    scope: Url,
    cross_origin_allow: Vec<String>,
    default_timeout: Duration,
    skip_waiting: bool,
    clients_claim: bool,
    classifier: Classifier,
    executor: StrategyExecutor,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
    reporter: Arc<Reporter>,
    activation_lock: Arc<RwLock<()>>,
    precache: Vec<Url>,
    precache_bucket: String,
    state: watch::Sender<LifecycleState>,
}

impl Engine {
    /// Build a worker from config; any invalid rule, scope or version fails here
    pub fn new(
        config: &Config,
        manifest: Option<&WebAppManifest>,
        deps: EngineDeps,
    ) -> HavenResult<Self> {
        let scope = parse_scope(&config.engine.scope)?;
        let version = config.engine.version.trim().to_string();
        let precache_bucket = bucket_name(&config.precache.bucket, &version);
        if version.is_empty() || !is_valid_bucket_name(&precache_bucket) {
            return Err(HavenError::BucketNameInvalid(precache_bucket));
        }

        let classifier = Classifier::from_config(&config.rules)?;
        let precache = precache_list(&scope, config, manifest)?;
        let offline_url = scope.join(&config.engine.offline_document)?;
        let state = watch::Sender::new(LifecycleState::Installing);

        let executor = StrategyExecutor::new(
            deps.storage.clone(),
            deps.network.clone(),
            deps.clock.clone(),
            deps.reporter.clone(),
            OfflineFallback::new(precache_bucket.clone(), offline_url),
        )
        .with_background_refresh(config.engine.background_refresh)
        .with_lifecycle(state.subscribe(), deps.activation_lock.clone());

        Ok(Self {
            id: Uuid::new_v4(),
            version,
            scope,
            cross_origin_allow: config.engine.cross_origin_allow.clone(),
            default_timeout: Duration::from_secs(config.network.default_timeout_seconds),
            skip_waiting: config.engine.skip_waiting,
            clients_claim: config.engine.clients_claim,
            classifier,
            executor,
            storage: deps.storage,
            network: deps.network,
            clock: deps.clock,
            reporter: deps.reporter,
            activation_lock: deps.activation_lock,
            precache,
            precache_bucket,
            state,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn precache_urls(&self) -> &[Url] {
        &self.precache
    }

    pub fn precache_bucket(&self) -> &str {
        &self.precache_bucket
    }

    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting
    }

    pub fn clients_claim(&self) -> bool {
        self.clients_claim
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Physical bucket names owned by this version
    pub fn current_buckets(&self) -> BTreeSet<String> {
        let mut buckets: BTreeSet<String> = self
            .classifier
            .cache_names()
            .into_iter()
            .map(|name| bucket_name(name, &self.version))
            .collect();
        buckets.insert(self.precache_bucket.clone());
        buckets
    }

    fn transition(&self, next: LifecycleState) -> HavenResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                result = Err(HavenError::InvalidTransition {
                    version: self.version.clone(),
                    from: state.to_string(),
                    to: next.to_string(),
                });
                false
            }
        });
        result
    }

    /// Retire this worker; a no-op when already redundant
    pub fn mark_redundant(&self) {
        if self.transition(LifecycleState::Redundant).is_ok() {
            info!(version = %self.version, "Worker is redundant");
        }
    }

    /// Open the static bucket and seed it with the precache list
    ///
    /// Individual seed failures are reported and listed; install still
    /// completes.
    pub async fn install(&self) -> HavenResult<InstallReport> {
        info!(version = %self.version, urls = self.precache.len(), "Installing worker");
        if let Err(e) = self.storage.open(&self.precache_bucket).await {
            self.mark_redundant();
            return Err(e);
        }

        let results = join_all(self.precache.iter().map(|url| self.seed(url))).await;

        let mut report = InstallReport {
            bucket: self.precache_bucket.clone(),
            ..InstallReport::default()
        };
        for (url, result) in self.precache.iter().zip(results) {
            match result {
                Ok(()) => report.seeded.push(url.to_string()),
                Err(e) => {
                    self.reporter.report_error(ErrorContext::Precache, &e);
                    report.failed.push(url.to_string());
                }
            }
        }

        self.transition(LifecycleState::Installed)?;
        self.reporter
            .record(
                EventKind::Installed,
                serde_json::json!({
                    "version": self.version,
                    "seeded": report.seeded.len(),
                    "failed": report.failed.len(),
                }),
            )
            .await;
        Ok(report)
    }

    async fn seed(&self, url: &Url) -> HavenResult<()> {
        let request = Request::get(url.clone());
        let response = self.network.fetch(&request).await?;
        if !response.is_cacheable() {
            return Err(HavenError::network(
                url.as_str(),
                format!("precache got status {}", response.status),
            ));
        }
        let entry = CacheEntry::from_response(request.cache_key(), &response, self.clock.now());
        self.storage
            .put(&self.precache_bucket, entry, &Expiration::default())
            .await
    }

    /// Purge stale buckets, then become active; repeat calls are no-ops
    pub async fn activate(&self) -> HavenResult<ActivationReport> {
        if self.state() == LifecycleState::Active {
            debug!(version = %self.version, "Already active");
            return Ok(ActivationReport::default());
        }

        self.transition(LifecycleState::Activating)?;
        let report = self.purge().await;
        self.transition(LifecycleState::Active)?;

        info!(
            version = %self.version,
            deleted = report.deleted.len(),
            "Worker activated"
        );
        self.reporter
            .record(
                EventKind::Activated,
                serde_json::json!({ "version": self.version }),
            )
            .await;
        Ok(report)
    }

    /// Delete every bucket this version does not own
    ///
    /// Bucket names are enumerated once under the activation lock; a failed
    /// deletion is reported and does not stop the pass.
    pub async fn purge(&self) -> ActivationReport {
        let _guard = self.activation_lock.write().await;
        let current = self.current_buckets();
        let mut report = ActivationReport::default();

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                self.reporter.report_error(ErrorContext::Purge, &e);
                return report;
            }
        };

        for name in names {
            if current.contains(&name) {
                report.kept.push(name);
                continue;
            }
            match self.storage.delete(&name).await {
                Ok(_) => {
                    info!(bucket = %name, "Deleted stale cache bucket");
                    report.deleted.push(name);
                }
                Err(e) => {
                    self.reporter.report_error(ErrorContext::Purge, &e);
                    report.failed.push(name);
                }
            }
        }

        if !report.deleted.is_empty() {
            self.reporter
                .record(
                    EventKind::CachePurged,
                    serde_json::json!({
                        "version": self.version,
                        "buckets": report.deleted,
                    }),
                )
                .await;
        }
        report
    }

    /// Take over an existing store as the active worker, without install or purge
    pub fn resume(&self) -> HavenResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Installing {
                *state = LifecycleState::Active;
                true
            } else {
                result = Err(HavenError::InvalidTransition {
                    version: self.version.clone(),
                    from: state.to_string(),
                    to: LifecycleState::Active.to_string(),
                });
                false
            }
        });
        result
    }

    fn intercepts_origin(&self, url: &Url) -> bool {
        if url.origin() == self.scope.origin() {
            return true;
        }
        url.host_str().is_some_and(|host| {
            self.cross_origin_allow
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host))
        })
    }

    /// Decide whether and how a request is intercepted
    pub fn route(&self, request: &Request) -> Route<'_> {
        if self.state() != LifecycleState::Active {
            return Route::PassThrough(PassReason::NotActive);
        }
        if !self.intercepts_origin(&request.url) {
            return Route::PassThrough(PassReason::CrossOrigin);
        }
        match self.classifier.classify(request) {
            None => Route::PassThrough(PassReason::Unmatched),
            Some(rule) if rule.is_bypass() => {
                Route::PassThrough(PassReason::Bypassed(rule.name().to_string()))
            }
            Some(rule) => Route::Intercept(rule),
        }
    }

    /// Strategy options a rule runs with under this version
    pub fn options_for(&self, rule: &Rule) -> StrategyOptions {
        StrategyOptions::for_rule(rule, &self.version, self.default_timeout)
    }

    /// Answer one request the way the worker would
    pub async fn handle_fetch(&self, request: &Request) -> HavenResult<Response> {
        let (rule, kind) = match self.route(request) {
            Route::Intercept(rule) => match rule.handler() {
                Some(kind) => (rule, kind),
                None => return self.network.fetch(request).await,
            },
            Route::PassThrough(reason) => {
                debug!(method = %request.method, url = %request.url, %reason, "Passing through");
                return self.network.fetch(request).await;
            }
        };

        debug!(
            method = %request.method,
            url = %request.url,
            rule = rule.name(),
            strategy = %kind,
            "Intercepting request"
        );
        let options = self.options_for(rule);
        match self.executor.execute(kind, request, &options).await {
            Err(e) if e.is_network_failure() && kind != StrategyKind::NetworkOnly => {
                self.reporter.report_error(ErrorContext::NetworkFallback, &e);
                Ok(self.executor.offline_response(request).await)
            }
            other => other,
        }
    }

    /// Wait for background refreshes started by earlier requests
    pub async fn settle(&self) {
        self.executor.settle().await;
    }
}

fn parse_scope(scope: &str) -> HavenResult<Url> {
    let url = Url::parse(scope).map_err(|e| HavenError::ScopeInvalid {
        scope: scope.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HavenError::ScopeInvalid {
            scope: scope.to_string(),
            reason: "scope must be an http or https URL".to_string(),
        });
    }
    Ok(url)
}

/// Configured URLs, the offline document, the manifest and its default icons
fn precache_list(
    scope: &Url,
    config: &Config,
    manifest: Option<&WebAppManifest>,
) -> HavenResult<Vec<Url>> {
    let mut paths: Vec<&str> = config.precache.urls.iter().map(String::as_str).collect();
    paths.push(&config.engine.offline_document);
    paths.push(&config.precache.manifest_path);
    if let Some(manifest) = manifest {
        for icon in manifest.default_icons() {
            paths.push(&icon.src);
        }
    }

    let mut urls: Vec<Url> = Vec::with_capacity(paths.len());
    for path in paths {
        let url = scope.join(path)?;
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    Ok(urls)
}
