//! Error types for Haven
//!
//! All modules use `HavenResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Haven operations
pub type HavenResult<T> = Result<T, HavenError>;

/// All errors that can occur in Haven
#[derive(Error, Debug)]
pub enum HavenError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rule '{rule}': {reason}")]
    RuleInvalid { rule: String, reason: String },

    #[error("Invalid scope URL '{scope}': {reason}")]
    ScopeInvalid { scope: String, reason: String },

    #[error("Invalid HTTP method: {0}")]
    MethodInvalid(String),

    #[error("Invalid manifest at {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    // Network errors
    #[error("Network request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("Network request to {url} timed out after {timeout_ms}ms")]
    NetworkTimeout { url: String, timeout_ms: u64 },

    #[error("Network unavailable: {0}")]
    Offline(String),

    // Cache errors
    #[error("Invalid cache bucket name: {0}")]
    BucketNameInvalid(String),

    #[error("Cache quota exceeded writing to {bucket}: {needed} bytes needed, quota {quota} bytes")]
    QuotaExceeded {
        bucket: String,
        needed: u64,
        quota: u64,
    },

    #[error("Failed to read cache bucket {bucket}: {reason}")]
    CacheRead { bucket: String, reason: String },

    #[error("Failed to write cache bucket {bucket}: {reason}")]
    CacheWrite { bucket: String, reason: String },

    // Lifecycle errors
    #[error("Invalid lifecycle transition for worker {version}: {from} -> {to}")]
    InvalidTransition {
        version: String,
        from: String,
        to: String,
    },

    #[error("No waiting worker to activate")]
    NoWaitingWorker,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HavenError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a rule validation error
    pub fn rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuleInvalid {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Create a generic network failure
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the network could not produce a response
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::NetworkTimeout { .. } | Self::Offline(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Run: haven config show (to inspect defaults)"),
            Self::RuleInvalid { .. } => Some("Check the [[rules]] table in your config"),
            Self::ScopeInvalid { .. } => Some("Set engine.scope to an absolute URL, e.g. https://example.com/"),
            Self::Offline(_) => Some("Retry without --offline, or run: haven install"),
            Self::QuotaExceeded { .. } => Some("Raise cache.quota_mb or run: haven cache clear"),
            _ => None,
        }
    }
}
