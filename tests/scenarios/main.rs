//! End-to-end scenarios against an in-memory store and a scripted network

use async_trait::async_trait;
use haven::cache::{CacheStorage, MemoryStorage};
use haven::config::Config;
use haven::http::{Method, Request, Response, ResponseSource};
use haven::lifecycle::{ControlMessage, LifecycleState, Registration, ReloadGuard};
use haven::network::Network;
use haven::report::{EventKind, Reporter};
use haven::{Engine, EngineDeps, HavenError, HavenResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const SCOPE: &str = "https://shop.test/";

struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedNetwork {
    fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            delay: Mutex::new(None),
        }
    }

    fn respond(&self, path: &str, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(format!("{}{}", SCOPE, path.trim_start_matches('/')), Response::ok(body));
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> HavenResult<Response> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(HavenError::Offline(request.url.to_string()));
        }
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(&request.cache_key())
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found")))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct World {
    storage: Arc<MemoryStorage>,
    network: Arc<ScriptedNetwork>,
    reporter: Arc<Reporter>,
}

impl World {
    fn new() -> Self {
        let network = ScriptedNetwork::new();
        for path in ["/", "/icons/icon-192x192.png", "/icons/icon-512x512.png", "/manifest.json"] {
            network.respond(path, &format!("precached {}", path));
        }
        network.respond("/offline", "<h1>offline page</h1>");
        Self {
            storage: Arc::new(MemoryStorage::new()),
            network: Arc::new(network),
            reporter: Arc::new(Reporter::new()),
        }
    }

    fn deps(&self) -> EngineDeps {
        EngineDeps::new(self.storage.clone(), self.network.clone())
            .with_reporter(self.reporter.clone())
    }

    async fn active_engine(&self, version: &str) -> Engine {
        let engine = Engine::new(&config(version), None, self.deps()).unwrap();
        engine.install().await.unwrap();
        engine.activate().await.unwrap();
        engine
    }
}

fn config(version: &str) -> Config {
    let mut config = Config::default();
    config.engine.scope = SCOPE.to_string();
    config.engine.version = version.to_string();
    config
}

fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

#[tokio::test]
async fn static_chunk_served_from_cache_when_offline() {
    let world = World::new();
    world.network.respond("/_next/static/chunk-a.js", "console.log('a')");
    let engine = world.active_engine("v1").await;
    let request = Request::get(url("/_next/static/chunk-a.js"));

    let online = engine.handle_fetch(&request).await.unwrap();
    engine.settle().await;
    assert_eq!(online.source, ResponseSource::Network);
    assert_eq!(world.storage.len("static-assets-v1"), 1);

    world.network.set_online(false);
    let offline = engine.handle_fetch(&request).await.unwrap();
    engine.settle().await;
    assert_eq!(offline.source, ResponseSource::Cache);
    assert_eq!(offline.status, 200);
    assert_eq!(offline.body, online.body);
}

#[tokio::test(start_paused = true)]
async fn slow_api_read_falls_back_to_last_payload() {
    let world = World::new();
    let engine = world.active_engine("v1").await;
    let request = Request::get(url("/api/products?x=1"));

    // Nothing cached yet
    world.network.set_delay(Some(Duration::from_secs(30)));
    let miss = engine.handle_fetch(&request).await.unwrap();
    assert_eq!(miss.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&miss.body).unwrap();
    assert_eq!(body["offline"], true);

    world.network.set_delay(None);
    world.network.respond("/api/products?x=1", r#"[{"id":1}]"#);
    let fresh = engine.handle_fetch(&request).await.unwrap();
    assert_eq!(fresh.source, ResponseSource::Network);

    world.network.respond("/api/products?x=1", r#"[{"id":2}]"#);
    world.network.set_delay(Some(Duration::from_secs(30)));
    let slow = engine.handle_fetch(&request).await.unwrap();
    assert_eq!(slow.source, ResponseSource::Cache);
    assert_eq!(slow.text(), r#"[{"id":1}]"#);

    // A different query string is a different key
    let other = engine
        .handle_fetch(&Request::get(url("/api/products?x=2")))
        .await
        .unwrap();
    assert_eq!(other.status, 503);
}

#[tokio::test]
async fn offline_order_post_surfaces_network_error() {
    let world = World::new();
    let engine = world.active_engine("v1").await;
    world.network.set_online(false);

    let request = Request::new(Method::Post, url("/api/orders")).with_body(r#"{"qty":2}"#);
    let result = engine.handle_fetch(&request).await;
    assert!(matches!(result, Err(HavenError::Offline(_))));

    let write = Request::new(Method::Post, url("/api/products")).with_body("{}");
    assert!(engine.handle_fetch(&write).await.is_err());

    assert_eq!(world.storage.keys().await.unwrap(), vec!["ecomama-static-v1"]);
}

#[tokio::test]
async fn version_bump_leaves_only_new_buckets() {
    let world = World::new();
    for bucket in ["ecomama-static-v7", "runtime-v7", "images-v7"] {
        world.storage.open(bucket).await.unwrap();
    }

    let engine = world.active_engine("v8").await;
    engine
        .handle_fetch(&Request::get(url("/logo.png")))
        .await
        .unwrap();
    engine.settle().await;

    let keys = world.storage.keys().await.unwrap();
    assert!(!keys.is_empty());
    assert!(keys.iter().all(|k| k.ends_with("-v8")), "left over: {:?}", keys);
    assert_eq!(world.reporter.count(EventKind::CachePurged), 1);
}

#[tokio::test]
async fn offline_navigation_gets_offline_document() {
    let world = World::new();
    let engine = world.active_engine("v1").await;
    world.network.set_online(false);

    let response = engine
        .handle_fetch(&Request::navigate(url("/some/page")))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<h1>offline page</h1>");

    // Without a precached copy the built-in document is served
    world.storage.delete("ecomama-static-v1").await.unwrap();
    let builtin = engine
        .handle_fetch(&Request::navigate(url("/other/page")))
        .await
        .unwrap();
    assert_eq!(builtin.status, 200);
    assert!(builtin.text().contains("offline"));
}

#[tokio::test]
async fn update_waits_for_skip_waiting_then_hands_over() {
    let world = World::new();
    let registration = Registration::new(Url::parse(SCOPE).unwrap(), world.deps());
    let mut changes = registration.subscribe_controller_changes();
    let pump = registration.start_message_pump().unwrap();

    let v7 = registration.create_worker(&config("v7"), None).unwrap();
    registration.register(v7.clone()).await.unwrap();
    assert_eq!(v7.state(), LifecycleState::Active);

    let client = registration.connect_client();
    assert_eq!(registration.controller(client).unwrap().id(), v7.id());

    let v8 = registration.create_worker(&config("v8"), None).unwrap();
    registration.register(v8.clone()).await.unwrap();
    assert_eq!(v8.state(), LifecycleState::Installed);
    assert!(registration.bridge().update_available());
    assert_eq!(registration.active().unwrap().id(), v7.id());

    // The old worker keeps serving until the update is accepted
    world.network.respond("/_next/static/app.js", "app");
    registration
        .fetch(client, &Request::get(url("/_next/static/app.js")))
        .await
        .unwrap();
    assert_eq!(world.storage.len("static-assets-v7"), 1);

    registration.bridge().request_skip_waiting().await.unwrap();
    let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.client, client);
    assert_eq!(change.version, "v8");

    let mut guard = ReloadGuard::new();
    assert!(guard.on_controller_change());
    assert!(!guard.on_controller_change());

    assert_eq!(v7.state(), LifecycleState::Redundant);
    assert_eq!(v8.state(), LifecycleState::Active);
    assert!(!registration.bridge().update_available());
    assert!(registration
        .deps()
        .storage
        .keys()
        .await
        .unwrap()
        .iter()
        .all(|k| k.ends_with("-v8")));

    // A stray message with no waiting worker is ignored
    registration.post_message(ControlMessage::SkipWaiting).await.unwrap();
    pump.abort();
}
