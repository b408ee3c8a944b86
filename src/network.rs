//! Network access abstraction
//!
//! The engine never talks to the network directly. It goes through the
//! `Network` trait so hosts can plug in a real HTTP client, an
//! always-offline stub, or a scripted fake in tests.

use crate::config::schema::NetworkConfig;
use crate::error::{HavenError, HavenResult};
use crate::http::{Request, Response};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Abstract network interface
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request and buffer the full response
    ///
    /// Any HTTP status is a successful fetch; only transport failures
    /// (DNS, refused connection, timeout, offline) are errors.
    async fn fetch(&self, request: &Request) -> HavenResult<Response>;

    /// Human-readable name for logs and status output
    fn name(&self) -> &'static str;
}

/// HTTP network backed by reqwest
pub struct HttpNetwork {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpNetwork {
    /// Build a client from network settings
    pub fn new(config: &NetworkConfig) -> HavenResult<Self> {
        let request_timeout = Duration::from_secs(config.request_timeout_seconds);
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(request_timeout)
            .build()
            .map_err(|e| HavenError::Internal(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            client,
            request_timeout,
        })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> HavenResult<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|_| HavenError::MethodInvalid(request.method.to_string()))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let url = request.url.to_string();
        let reply = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HavenError::NetworkTimeout {
                    url: url.clone(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                }
            } else {
                HavenError::network(url.clone(), e.to_string())
            }
        })?;

        let status = reply.status().as_u16();
        let mut response = Response::new(status, Vec::new());
        for (name, value) in reply.headers() {
            if let Ok(value) = value.to_str() {
                response = response.with_header(name.as_str(), value);
            }
        }

        let body = reply
            .bytes()
            .await
            .map_err(|e| HavenError::network(url.clone(), format!("reading body: {}", e)))?;
        response.body = body.to_vec();

        debug!("{} {} -> {}", request.method, url, status);
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// A network that is never reachable
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
    async fn fetch(&self, request: &Request) -> HavenResult<Response> {
        Err(HavenError::Offline(request.url.to_string()))
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}
