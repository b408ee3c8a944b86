//! Configuration schema for Haven
//!
//! Configuration is stored at `~/.config/haven/config.toml`

use crate::cache::Expiration;
use crate::classifier::RuleGroup;
use crate::http::Method;
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Worker identity and interception settings
    pub engine: EngineConfig,

    /// Network settings
    pub network: NetworkConfig,

    /// Install-time precache settings
    pub precache: PrecacheConfig,

    /// Cache storage settings
    pub cache: CacheConfig,

    /// Classifier rule table, evaluated by group then table order
    pub rules: Vec<RuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            engine: EngineConfig::default(),
            network: NetworkConfig::default(),
            precache: PrecacheConfig::default(),
            cache: CacheConfig::default(),
            rules: default_rules(),
        }
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append lifecycle events to the event journal
    pub event_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            event_log: true,
        }
    }
}

/// Worker identity and interception settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scope URL; its origin is the "same origin" for interception
    pub scope: String,

    /// Version token appended to every bucket name. Bump it to invalidate all caches.
    pub version: String,

    /// Path of the offline fallback document
    pub offline_document: String,

    /// Activate a newly installed worker without waiting for SKIP_WAITING
    pub skip_waiting: bool,

    /// Claim open clients as part of activation
    pub clients_claim: bool,

    /// Refresh fresh cache-first hits in the background
    pub background_refresh: bool,

    /// Cross-origin hosts that are still intercepted (CDNs, tile servers)
    pub cross_origin_allow: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scope: "http://localhost:3000/".to_string(),
            version: "v1".to_string(),
            offline_document: "/offline".to_string(),
            skip_waiting: false,
            clients_claim: true,
            background_refresh: true,
            cross_origin_allow: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
                "tile.openstreetmap.org".to_string(),
            ],
        }
    }
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network-first timeout for rules that don't set one
    pub default_timeout_seconds: u64,

    /// Hard per-request timeout of the HTTP client
    pub request_timeout_seconds: u64,

    /// User-Agent header sent by the HTTP client
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 5,
            request_timeout_seconds: 30,
            user_agent: format!("haven/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Install-time precache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
    /// Logical name of the static bucket seeded on install
    pub bucket: String,

    /// Paths seeded on install (the offline document is always added)
    pub urls: Vec<String>,

    /// Path the manifest is served from
    pub manifest_path: String,

    /// Local copy of manifest.json used to pick default icons
    pub manifest_file: Option<PathBuf>,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            bucket: "ecomama-static".to_string(),
            urls: vec![
                "/".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
            ],
            manifest_path: "/manifest.json".to_string(),
            manifest_file: None,
        }
    }
}

/// Cache storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory of the on-disk store (defaults to the state directory)
    pub dir: Option<PathBuf>,

    /// Total body bytes allowed across buckets, in MB (unset = unlimited)
    pub quota_mb: Option<u64>,
}

/// One classifier rule as written in config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Unique rule name
    pub name: String,

    /// Priority group
    pub group: RuleGroup,

    /// Case-insensitive regex matched against the full URL
    pub url_pattern: String,

    /// Methods matched (empty = GET, or any method for bypass rules)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<Method>,

    /// Match document navigations only
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub navigate_only: bool,

    /// Strategy (absent for bypass rules)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<StrategyKind>,

    /// Logical bucket name, versioned at runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_name: Option<String>,

    /// Network-first timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_timeout_seconds: Option<u64>,

    /// Capacity and age limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<Expiration>,
}

impl RuleConfig {
    fn bypass(name: &str, url_pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            group: RuleGroup::Bypass,
            url_pattern: url_pattern.to_string(),
            methods: vec![],
            navigate_only: false,
            handler: None,
            cache_name: None,
            network_timeout_seconds: None,
            expiration: None,
        }
    }

    fn cached(
        name: &str,
        group: RuleGroup,
        url_pattern: &str,
        handler: StrategyKind,
        cache_name: &str,
        max_entries: usize,
        max_age_seconds: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            group,
            url_pattern: url_pattern.to_string(),
            methods: vec![],
            navigate_only: false,
            handler: Some(handler),
            cache_name: Some(cache_name.to_string()),
            network_timeout_seconds: None,
            expiration: Some(Expiration {
                max_entries: Some(max_entries),
                max_age_seconds: Some(max_age_seconds),
            }),
        }
    }

    fn with_timeout(mut self, seconds: u64) -> Self {
        self.network_timeout_seconds = Some(seconds);
        self
    }
}

/// The built-in rule table
pub fn default_rules() -> Vec<RuleConfig> {
    use RuleGroup::*;
    use StrategyKind::*;

    vec![
        RuleConfig::bypass(
            "build-tooling",
            r"/__nextjs|/_next/webpack-hmr|\.hot-update\.(js|json)$",
        ),
        RuleConfig::bypass(
            "auth",
            r"/api/auth/|/(login|register|logout)(/|\?|$)",
        ),
        RuleConfig::bypass("sensitive-api", r"/api/(profile|cart|orders)(/|\?|$)"),
        RuleConfig::bypass("realtime", r"^wss?://|/socket\.io/|/ws(/|\?|$)"),
        RuleConfig::cached(
            "next-static",
            Static,
            r"/_next/static/",
            CacheFirst,
            "static-assets",
            200,
            365 * DAY_SECS,
        ),
        RuleConfig::cached(
            "google-fonts",
            Static,
            r"^https://fonts\.(googleapis|gstatic)\.com/",
            CacheFirst,
            "fonts",
            10,
            365 * DAY_SECS,
        ),
        RuleConfig::cached(
            "font-files",
            Static,
            r"\.(woff2?|ttf|otf|eot)(\?.*)?$",
            CacheFirst,
            "fonts",
            10,
            365 * DAY_SECS,
        ),
        RuleConfig::cached(
            "scripts-styles",
            Static,
            r"\.(js|css)(\?.*)?$",
            StaleWhileRevalidate,
            "static-resources",
            60,
            30 * DAY_SECS,
        ),
        RuleConfig::cached(
            "map-tiles",
            Image,
            r"^https://tile\.openstreetmap\.org/",
            CacheFirst,
            "map-tiles",
            200,
            30 * DAY_SECS,
        ),
        RuleConfig::cached(
            "next-images",
            Image,
            r"/_next/image\?url=.+$",
            CacheFirst,
            "next-images",
            100,
            7 * DAY_SECS,
        ),
        RuleConfig::cached(
            "images",
            Image,
            r"\.(png|jpe?g|svg|gif|webp|avif|ico)(\?.*)?$",
            CacheFirst,
            "images",
            100,
            7 * DAY_SECS,
        ),
        RuleConfig::cached(
            "next-data",
            VersionedData,
            r"/_next/data/.+\.json(\?.*)?$",
            NetworkFirst,
            "next-data",
            50,
            60 * 60,
        )
        .with_timeout(3),
        RuleConfig {
            methods: vec![Method::Get],
            ..RuleConfig::cached(
                "api-read",
                ReadApi,
                r"/api/(products|farmers|events|listings)(/|\?|$)",
                NetworkFirst,
                "runtime",
                30,
                10 * 60,
            )
            .with_timeout(5)
        },
        RuleConfig {
            name: "api-write".to_string(),
            group: MutatingApi,
            url_pattern: r"/api/".to_string(),
            methods: vec![Method::Post, Method::Put, Method::Patch, Method::Delete],
            navigate_only: false,
            handler: Some(NetworkOnly),
            cache_name: None,
            network_timeout_seconds: None,
            expiration: None,
        },
        RuleConfig {
            navigate_only: true,
            ..RuleConfig::cached("pages", Navigation, r".*", NetworkFirst, "pages", 50, DAY_SECS)
                .with_timeout(10)
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[engine]"));
        assert!(toml.contains("[[rules]]"));
        assert!(toml.contains("group = \"bypass\""));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.version, "v1");
        assert_eq!(config.rules, default_rules());
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [engine]
            version = "v8"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.engine.version, "v8");
        assert_eq!(config.precache.bucket, "ecomama-static"); // default preserved
    }

    #[test]
    fn rules_table_replaces_defaults() {
        let toml = r#"
            [[rules]]
            name = "everything"
            group = "navigation"
            url_pattern = ".*"
            navigate_only = true
            handler = "NetworkFirst"
            cache_name = "pages"
            network_timeout_seconds = 4
            expiration = { max_entries = 5 }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.rules.len(), 1);
        let rule = &config.rules[0];
        assert_eq!(rule.handler, Some(StrategyKind::NetworkFirst));
        assert_eq!(rule.expiration.unwrap().max_entries, Some(5));
        assert_eq!(rule.expiration.unwrap().max_age_seconds, None);
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.rules, config.rules);
    }
}
