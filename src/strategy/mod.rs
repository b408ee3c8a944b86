//! Strategy executor
//!
//! Runs one of four fetch strategies for an intercepted request:
//!
//! - **CacheFirst**: fresh entry wins, network on miss, stale entry as last resort
//! - **NetworkFirst**: network raced against a timeout, then cache, then offline fallback
//! - **StaleWhileRevalidate**: cached entry now, refresh in the background
//! - **NetworkOnly**: straight to the network
//!
//! Only status-200 responses are stored. Cache read and write failures are
//! reported and never change the response. Once the owning worker is
//! redundant its writes are dropped, so a late refresh cannot recreate a
//! purged bucket.

mod task;

pub use task::{BackgroundTasks, Cancellable, Outcome};

use crate::cache::{CacheEntry, CacheStorage, Expiration};
use crate::classifier::Rule;
use crate::clock::Clock;
use crate::error::{HavenError, HavenResult};
use crate::http::{cache_key, Request, Response, ResponseSource};
use crate::lifecycle::LifecycleState;
use crate::network::Network;
use crate::report::{ErrorContext, Reporter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::debug;
use url::Url;

/// Fetch strategy named by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
}

impl StrategyKind {
    /// Whether the strategy reads or writes a bucket
    pub fn uses_cache(&self) -> bool {
        !matches!(self, Self::NetworkOnly)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CacheFirst => "CacheFirst",
            Self::NetworkFirst => "NetworkFirst",
            Self::StaleWhileRevalidate => "StaleWhileRevalidate",
            Self::NetworkOnly => "NetworkOnly",
        };
        f.write_str(name)
    }
}

/// Per-request strategy parameters
#[derive(Debug, Clone)]
pub struct StrategyOptions {
    /// Physical (versioned) bucket name
    pub bucket: Option<String>,
    pub expiration: Expiration,
    pub network_timeout: Duration,
}

impl StrategyOptions {
    /// Options for a matched rule under a version token
    pub fn for_rule(rule: &Rule, version: &str, default_timeout: Duration) -> Self {
        Self {
            bucket: rule.bucket(version),
            expiration: *rule.expiration(),
            network_timeout: rule.network_timeout().unwrap_or(default_timeout),
        }
    }
}

/// Worker state and purge lock consulted before every cache write
#[derive(Clone)]
struct WriteGate {
    state: watch::Receiver<LifecycleState>,
    /// Shared by writers, exclusive for the purge pass
    purge_lock: Arc<RwLock<()>>,
}

/// Handles shared with background tasks
#[derive(Clone)]
struct Shared {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
    reporter: Arc<Reporter>,
    gate: Option<WriteGate>,
}

impl Shared {
    /// Read an entry; read failures count as a miss
    async fn lookup(&self, bucket: &str, key: &str) -> Option<CacheEntry> {
        match self.storage.get(bucket, key).await {
            Ok(entry) => entry,
            Err(e) => {
                let e = match e {
                    HavenError::CacheRead { .. } => e,
                    other => HavenError::CacheRead {
                        bucket: bucket.to_string(),
                        reason: other.to_string(),
                    },
                };
                self.reporter.report_error(ErrorContext::CacheRead, &e);
                None
            }
        }
    }

    /// Store a 200 response; write failures are reported and dropped
    async fn store(&self, bucket: &str, key: &str, response: &Response, expiration: &Expiration) {
        if !response.is_cacheable() {
            debug!(bucket, key, status = response.status, "Not caching non-200 response");
            return;
        }

        // Held across the put so a purge never interleaves with it
        let _writing = match &self.gate {
            Some(gate) => {
                let guard = gate.purge_lock.read().await;
                let retired = *gate.state.borrow() == LifecycleState::Redundant;
                if retired {
                    debug!(bucket, key, "Worker is redundant, dropping cache write");
                    return;
                }
                Some(guard)
            }
            None => None,
        };

        let entry = CacheEntry::from_response(key, response, self.clock.now());
        if let Err(e) = self.storage.put(bucket, entry, expiration).await {
            self.reporter.report_error(ErrorContext::CacheWrite, &e);
        }
    }

    async fn fetch_and_store(
        &self,
        request: &Request,
        bucket: &str,
        expiration: &Expiration,
    ) -> HavenResult<Response> {
        let response = self.network.fetch(request).await?;
        self.store(bucket, &request.cache_key(), &response, expiration)
            .await;
        Ok(response)
    }
}

/// Where to find the offline fallback document
#[derive(Debug, Clone)]
pub struct OfflineFallback {
    /// Versioned precache bucket
    pub bucket: String,
    /// Absolute URL of the offline document
    pub url: Url,
}

impl OfflineFallback {
    pub fn new(bucket: impl Into<String>, url: Url) -> Self {
        Self {
            bucket: bucket.into(),
            url,
        }
    }

    /// Cache key of the offline document
    pub fn key(&self) -> String {
        cache_key(&self.url)
    }

    async fn document(&self, shared: &Shared) -> Response {
        match shared.lookup(&self.bucket, &self.key()).await {
            Some(entry) => entry.to_response().with_source(ResponseSource::Fallback),
            None => Response::offline_document(),
        }
    }

    /// Offline document for navigations, 503 JSON for everything else
    async fn for_request(&self, shared: &Shared, request: &Request) -> Response {
        if request.is_navigation() {
            self.document(shared).await
        } else {
            Response::offline_json(&request.url)
        }
    }
}

/// Runs strategies against one storage, network and clock
pub struct StrategyExecutor {
    shared: Shared,
    background: BackgroundTasks,
    fallback: OfflineFallback,
    background_refresh: bool,
}

impl StrategyExecutor {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        clock: Arc<dyn Clock>,
        reporter: Arc<Reporter>,
        fallback: OfflineFallback,
    ) -> Self {
        Self {
            shared: Shared {
                storage,
                network,
                clock,
                reporter,
                gate: None,
            },
            background: BackgroundTasks::new(),
            fallback,
            background_refresh: true,
        }
    }

    /// Toggle the background refresh of fresh cache-first hits
    pub fn with_background_refresh(mut self, enabled: bool) -> Self {
        self.background_refresh = enabled;
        self
    }

    /// Drop writes once `state` reaches `Redundant`; writes hold `purge_lock` shared
    pub fn with_lifecycle(
        mut self,
        state: watch::Receiver<LifecycleState>,
        purge_lock: Arc<RwLock<()>>,
    ) -> Self {
        self.shared.gate = Some(WriteGate { state, purge_lock });
        self
    }

    pub fn fallback(&self) -> &OfflineFallback {
        &self.fallback
    }

    /// Run `kind` for `request`
    pub async fn execute(
        &self,
        kind: StrategyKind,
        request: &Request,
        options: &StrategyOptions,
    ) -> HavenResult<Response> {
        if !kind.uses_cache() {
            return self.network_only(request).await;
        }

        let bucket = options.bucket.as_deref().ok_or_else(|| {
            HavenError::Internal(format!("{} requires a cache bucket", kind))
        })?;

        match kind {
            StrategyKind::CacheFirst => self.cache_first(request, bucket, options).await,
            StrategyKind::NetworkFirst => self.network_first(request, bucket, options).await,
            StrategyKind::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, bucket, options).await
            }
            StrategyKind::NetworkOnly => self.network_only(request).await,
        }
    }

    pub async fn cache_first(
        &self,
        request: &Request,
        bucket: &str,
        options: &StrategyOptions,
    ) -> HavenResult<Response> {
        let key = request.cache_key();
        let cached = self.shared.lookup(bucket, &key).await;

        if let Some(entry) = &cached {
            if !entry.is_expired(self.shared.clock.now(), &options.expiration) {
                debug!(bucket, key = %key, "Cache hit");
                if self.background_refresh {
                    self.revalidate(request, bucket, options.expiration);
                }
                return Ok(entry.to_response());
            }
            debug!(bucket, key = %key, "Cached entry is stale");
        }

        match self
            .shared
            .fetch_and_store(request, bucket, &options.expiration)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => match cached {
                Some(stale) => {
                    self.shared
                        .reporter
                        .report_error(ErrorContext::NetworkFallback, &e);
                    Ok(stale.to_response())
                }
                None => Err(e),
            },
        }
    }

    pub async fn network_first(
        &self,
        request: &Request,
        bucket: &str,
        options: &StrategyOptions,
    ) -> HavenResult<Response> {
        let network = self.shared.network.clone();
        let outgoing = request.clone();
        let fetch = Cancellable::spawn(async move { network.fetch(&outgoing).await });

        let failure = match fetch.race(options.network_timeout).await {
            Outcome::Completed(Ok(response)) => {
                self.shared
                    .store(bucket, &request.cache_key(), &response, &options.expiration)
                    .await;
                return Ok(response);
            }
            Outcome::Completed(Err(e)) => e,
            Outcome::TimedOut => HavenError::NetworkTimeout {
                url: request.url.to_string(),
                timeout_ms: options.network_timeout.as_millis() as u64,
            },
            Outcome::Cancelled => HavenError::network(request.url.as_str(), "fetch cancelled"),
        };
        self.shared
            .reporter
            .report_error(ErrorContext::NetworkFallback, &failure);

        if let Some(entry) = self.fresh_entry(request, bucket, &options.expiration).await {
            return Ok(entry.to_response());
        }
        Ok(self.fallback.for_request(&self.shared, request).await)
    }

    pub async fn stale_while_revalidate(
        &self,
        request: &Request,
        bucket: &str,
        options: &StrategyOptions,
    ) -> HavenResult<Response> {
        if let Some(entry) = self.fresh_entry(request, bucket, &options.expiration).await {
            self.revalidate(request, bucket, options.expiration);
            return Ok(entry.to_response());
        }

        self.shared
            .fetch_and_store(request, bucket, &options.expiration)
            .await
    }

    pub async fn network_only(&self, request: &Request) -> HavenResult<Response> {
        self.shared.network.fetch(request).await
    }

    /// Response of last resort when neither network nor cache can answer
    pub async fn offline_response(&self, request: &Request) -> Response {
        self.fallback.for_request(&self.shared, request).await
    }

    /// Entry within max-age; expired entries are evicted on the way
    async fn fresh_entry(
        &self,
        request: &Request,
        bucket: &str,
        expiration: &Expiration,
    ) -> Option<CacheEntry> {
        let key = request.cache_key();
        let entry = self.shared.lookup(bucket, &key).await?;
        if !entry.is_expired(self.shared.clock.now(), expiration) {
            return Some(entry);
        }

        debug!(bucket, key = %key, "Evicting expired entry");
        if let Err(e) = self.shared.storage.remove(bucket, &key).await {
            self.shared.reporter.report_error(ErrorContext::CacheWrite, &e);
        }
        None
    }

    fn revalidate(&self, request: &Request, bucket: &str, expiration: Expiration) {
        let shared = self.shared.clone();
        let request = request.clone();
        let bucket = bucket.to_string();
        self.background.spawn(async move {
            if let Err(e) = shared.fetch_and_store(&request, &bucket, &expiration).await {
                shared
                    .reporter
                    .report_error(ErrorContext::BackgroundRefresh, &e);
            }
        });
    }

    /// Wait for outstanding background refreshes
    pub async fn settle(&self) {
        self.background.settle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::clock::ManualClock;
    use crate::http::Method;
    use crate::test_support::FakeNetwork;
    use async_trait::async_trait;

    struct Harness {
        storage: Arc<MemoryStorage>,
        network: Arc<FakeNetwork>,
        clock: Arc<ManualClock>,
        reporter: Arc<Reporter>,
        executor: StrategyExecutor,
    }

    fn harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(FakeNetwork::new());
        let clock = Arc::new(ManualClock::default());
        let reporter = Arc::new(Reporter::new());
        let fallback = OfflineFallback::new(
            "static-v1",
            Url::parse("https://shop.test/offline").unwrap(),
        );
        let executor = StrategyExecutor::new(
            storage.clone(),
            network.clone(),
            clock.clone(),
            reporter.clone(),
            fallback,
        );
        Harness {
            storage,
            network,
            clock,
            reporter,
            executor,
        }
    }

    fn options(max_age: Option<u64>, timeout_secs: u64) -> StrategyOptions {
        StrategyOptions {
            bucket: Some("b-v1".to_string()),
            expiration: Expiration {
                max_entries: Some(10),
                max_age_seconds: max_age,
            },
            network_timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn get(url: &str) -> Request {
        Request::parse(Method::Get, url).unwrap()
    }

    async fn seed(h: &Harness, url: &str, body: &str) {
        let entry = CacheEntry::from_response(cache_key(&Url::parse(url).unwrap()), &Response::ok(body), h.clock.now());
        h.storage.put("b-v1", entry, &Expiration::default()).await.unwrap();
    }

    #[tokio::test]
    async fn cache_first_miss_fetches_and_stores() {
        let h = harness();
        h.network.respond("https://shop.test/a.png", Response::ok("img"));

        let resp = h
            .executor
            .execute(StrategyKind::CacheFirst, &get("https://shop.test/a.png"), &options(Some(60), 5))
            .await
            .unwrap();
        assert_eq!(resp.source, ResponseSource::Network);
        assert!(h.storage.get("b-v1", "https://shop.test/a.png").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cache_first_fresh_hit_refreshes_in_background() {
        let h = harness();
        seed(&h, "https://shop.test/a.png", "old").await;
        h.network.respond("https://shop.test/a.png", Response::ok("new"));

        let resp = h
            .executor
            .cache_first(&get("https://shop.test/a.png"), "b-v1", &options(Some(60), 5))
            .await
            .unwrap();
        assert_eq!(resp.source, ResponseSource::Cache);
        assert_eq!(resp.text(), "old");

        h.executor.settle().await;
        let stored = h.storage.get("b-v1", "https://shop.test/a.png").await.unwrap().unwrap();
        assert_eq!(stored.body, b"new");
    }

    #[tokio::test]
    async fn cache_first_stale_entry_survives_network_failure() {
        let h = harness();
        seed(&h, "https://shop.test/a.png", "old").await;
        h.clock.advance(chrono::Duration::seconds(120));
        h.network.set_online(false);

        let resp = h
            .executor
            .cache_first(&get("https://shop.test/a.png"), "b-v1", &options(Some(60), 5))
            .await
            .unwrap();
        assert_eq!(resp.text(), "old");
        assert_eq!(h.reporter.error_count(ErrorContext::NetworkFallback), 1);
    }

    #[tokio::test]
    async fn cache_first_miss_offline_propagates() {
        let h = harness();
        h.network.set_online(false);

        let err = h
            .executor
            .cache_first(&get("https://shop.test/a.png"), "b-v1", &options(None, 5))
            .await
            .unwrap_err();
        assert!(err.is_network_failure());
    }

    #[tokio::test]
    async fn non_200_is_returned_but_not_stored() {
        let h = harness();
        h.network.respond("https://shop.test/missing.png", Response::new(404, "nope"));

        let resp = h
            .executor
            .cache_first(&get("https://shop.test/missing.png"), "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(h.storage.len("b-v1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn network_first_timeout_serves_cache_and_discards_late_result() {
        let h = harness();
        seed(&h, "https://shop.test/api/products", "cached").await;
        h.network.respond("https://shop.test/api/products", Response::ok("late"));
        h.network.delay(Duration::from_secs(30));

        let resp = h
            .executor
            .network_first(&get("https://shop.test/api/products"), "b-v1", &options(Some(600), 5))
            .await
            .unwrap();
        assert_eq!(resp.source, ResponseSource::Cache);
        assert_eq!(resp.text(), "cached");

        tokio::time::sleep(Duration::from_secs(60)).await;
        let stored = h.storage.get("b-v1", "https://shop.test/api/products").await.unwrap().unwrap();
        assert_eq!(stored.body, b"cached");
        assert_eq!(h.network.calls(), 1);
        assert_eq!(h.network.completed(), 0);
    }

    #[tokio::test]
    async fn redundant_worker_drops_writes() {
        let h = harness();
        let (state, state_rx) = watch::channel(LifecycleState::Active);
        let executor = StrategyExecutor::new(
            h.storage.clone(),
            h.network.clone(),
            h.clock.clone(),
            h.reporter.clone(),
            OfflineFallback::new("static-v1", Url::parse("https://shop.test/offline").unwrap()),
        )
        .with_lifecycle(state_rx, Arc::new(RwLock::new(())));
        h.network.respond("https://shop.test/a.png", Response::ok("img"));
        h.network.respond("https://shop.test/b.png", Response::ok("img"));

        executor
            .cache_first(&get("https://shop.test/a.png"), "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(h.storage.len("b-v1"), 1);

        state.send_replace(LifecycleState::Redundant);
        let resp = executor
            .cache_first(&get("https://shop.test/b.png"), "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(resp.source, ResponseSource::Network);
        assert_eq!(h.storage.len("b-v1"), 1);
    }

    struct UnreadableStorage;

    #[async_trait]
    impl CacheStorage for UnreadableStorage {
        async fn open(&self, _bucket: &str) -> HavenResult<()> {
            Ok(())
        }

        async fn keys(&self) -> HavenResult<Vec<String>> {
            Ok(vec![])
        }

        async fn delete(&self, _bucket: &str) -> HavenResult<bool> {
            Ok(false)
        }

        async fn get(&self, _bucket: &str, _key: &str) -> HavenResult<Option<CacheEntry>> {
            Err(HavenError::io("reading bucket", std::io::Error::other("disk gone")))
        }

        async fn put(&self, _bucket: &str, _entry: CacheEntry, _expiration: &Expiration) -> HavenResult<()> {
            Ok(())
        }

        async fn remove(&self, _bucket: &str, _key: &str) -> HavenResult<bool> {
            Ok(false)
        }

        async fn entries(&self, _bucket: &str) -> HavenResult<Vec<CacheEntry>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn read_failure_counts_as_miss() {
        let network = Arc::new(FakeNetwork::new());
        let reporter = Arc::new(Reporter::new());
        let executor = StrategyExecutor::new(
            Arc::new(UnreadableStorage),
            network.clone(),
            Arc::new(ManualClock::default()),
            reporter.clone(),
            OfflineFallback::new("static-v1", Url::parse("https://shop.test/offline").unwrap()),
        );
        network.respond("https://shop.test/a.png", Response::ok("img"));

        let resp = executor
            .cache_first(&get("https://shop.test/a.png"), "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(resp.source, ResponseSource::Network);
        assert_eq!(reporter.error_count(ErrorContext::CacheRead), 1);
    }

    #[tokio::test]
    async fn network_first_offline_without_cache() {
        let h = harness();
        h.network.set_online(false);

        let resp = h
            .executor
            .network_first(&get("https://shop.test/api/products"), "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(resp.status, 503);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["offline"], true);

        let nav = Request::navigate(Url::parse("https://shop.test/market").unwrap());
        let resp = h
            .executor
            .network_first(&nav, "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.source, ResponseSource::Fallback);
    }

    #[tokio::test]
    async fn network_first_prefers_cached_offline_document() {
        let h = harness();
        let entry = CacheEntry::from_response(
            "https://shop.test/offline",
            &Response::ok("custom offline page"),
            h.clock.now(),
        );
        h.storage.put("static-v1", entry, &Expiration::default()).await.unwrap();
        h.network.set_online(false);

        let nav = Request::navigate(Url::parse("https://shop.test/market").unwrap());
        let resp = h
            .executor
            .network_first(&nav, "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(resp.text(), "custom offline page");
        assert_eq!(resp.source, ResponseSource::Fallback);
    }

    #[tokio::test]
    async fn network_first_evicts_expired_entry() {
        let h = harness();
        seed(&h, "https://shop.test/api/products", "cached").await;
        h.clock.advance(chrono::Duration::seconds(700));
        h.network.set_online(false);

        let resp = h
            .executor
            .network_first(&get("https://shop.test/api/products"), "b-v1", &options(Some(600), 5))
            .await
            .unwrap();
        assert_eq!(resp.status, 503);
        assert!(h.storage.get("b-v1", "https://shop.test/api/products").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_while_revalidate_returns_cached_then_refreshes() {
        let h = harness();
        seed(&h, "https://shop.test/app.js", "v1").await;
        h.network.respond("https://shop.test/app.js", Response::ok("v2"));

        let resp = h
            .executor
            .stale_while_revalidate(&get("https://shop.test/app.js"), "b-v1", &options(Some(60), 5))
            .await
            .unwrap();
        assert_eq!(resp.text(), "v1");

        h.executor.settle().await;
        let stored = h.storage.get("b-v1", "https://shop.test/app.js").await.unwrap().unwrap();
        assert_eq!(stored.body, b"v2");
    }

    #[tokio::test]
    async fn background_refresh_failure_is_swallowed() {
        let h = harness();
        seed(&h, "https://shop.test/app.js", "v1").await;
        h.network.set_online(false);

        let resp = h
            .executor
            .stale_while_revalidate(&get("https://shop.test/app.js"), "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(resp.text(), "v1");

        h.executor.settle().await;
        assert_eq!(h.reporter.error_count(ErrorContext::BackgroundRefresh), 1);
    }

    #[tokio::test]
    async fn network_only_never_touches_cache() {
        let h = harness();
        h.network.respond("https://shop.test/api/listings", Response::new(201, "created"));
        let req = Request::parse(Method::Post, "https://shop.test/api/listings").unwrap();

        let resp = h
            .executor
            .execute(StrategyKind::NetworkOnly, &req, &StrategyOptions {
                bucket: None,
                expiration: Expiration::default(),
                network_timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();
        assert_eq!(resp.status, 201);
        assert!(h.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_failure_does_not_change_response() {
        let storage = Arc::new(MemoryStorage::with_quota(2));
        let network = Arc::new(FakeNetwork::new());
        let reporter = Arc::new(Reporter::new());
        let executor = StrategyExecutor::new(
            storage.clone(),
            network.clone(),
            Arc::new(ManualClock::default()),
            reporter.clone(),
            OfflineFallback::new("static-v1", Url::parse("https://shop.test/offline").unwrap()),
        );
        network.respond("https://shop.test/big.png", Response::ok("too large"));

        let resp = executor
            .cache_first(&get("https://shop.test/big.png"), "b-v1", &options(None, 5))
            .await
            .unwrap();
        assert_eq!(resp.text(), "too large");
        assert_eq!(reporter.error_count(ErrorContext::CacheWrite), 1);
    }
}
