//! Compiled classifier rules

use crate::cache::{bucket_name, is_valid_bucket_name, Expiration};
use crate::classifier::RuleGroup;
use crate::config::RuleConfig;
use crate::error::{HavenError, HavenResult};
use crate::http::{Method, Request};
use crate::strategy::StrategyKind;
use regex::{Regex, RegexBuilder};
use std::time::Duration;

/// A validated rule, ready to match requests
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    group: RuleGroup,
    pattern: Regex,
    methods: Vec<Method>,
    navigate_only: bool,
    handler: Option<StrategyKind>,
    cache_name: Option<String>,
    network_timeout: Option<Duration>,
    expiration: Expiration,
}

impl Rule {
    /// Validate a config entry and compile its pattern
    pub fn compile(config: &RuleConfig) -> HavenResult<Self> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(HavenError::rule("<unnamed>", "rule name must not be empty"));
        }

        let pattern = RegexBuilder::new(&config.url_pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| HavenError::rule(name, format!("invalid url_pattern: {}", e)))?;

        Self::check_handler(name, config)?;

        if let Some(cache) = &config.cache_name {
            if !is_valid_bucket_name(cache) {
                return Err(HavenError::rule(
                    name,
                    format!("cache_name '{}' may only contain letters, digits, '-', '_' and '.'", cache),
                ));
            }
        }

        let expiration = config.expiration.unwrap_or_default();
        if expiration.max_entries == Some(0) {
            return Err(HavenError::rule(name, "expiration.max_entries must be at least 1"));
        }

        if config.network_timeout_seconds == Some(0) {
            return Err(HavenError::rule(name, "network_timeout_seconds must be at least 1"));
        }

        Ok(Self {
            name: name.to_string(),
            group: config.group,
            pattern,
            methods: config.methods.clone(),
            navigate_only: config.navigate_only,
            handler: config.handler,
            cache_name: config.cache_name.clone(),
            network_timeout: config.network_timeout_seconds.map(Duration::from_secs),
            expiration,
        })
    }

    fn check_handler(name: &str, config: &RuleConfig) -> HavenResult<()> {
        match (config.group, config.handler) {
            (RuleGroup::Bypass, Some(_)) => Err(HavenError::rule(
                name,
                "bypass rules are never intercepted and cannot name a handler",
            )),
            (RuleGroup::Bypass, None) if config.cache_name.is_some() => Err(HavenError::rule(
                name,
                "bypass rules cannot name a cache",
            )),
            (RuleGroup::Bypass, None) => Ok(()),
            (_, None) => Err(HavenError::rule(name, "missing handler")),
            (RuleGroup::MutatingApi, Some(handler)) if handler != StrategyKind::NetworkOnly => {
                Err(HavenError::rule(name, "mutating API rules must use NetworkOnly"))
            }
            (_, Some(StrategyKind::NetworkOnly)) if config.cache_name.is_some() => Err(
                HavenError::rule(name, "NetworkOnly rules never touch a cache; remove cache_name"),
            ),
            (_, Some(StrategyKind::NetworkOnly)) => Ok(()),
            (_, Some(_)) if config.cache_name.is_none() => {
                Err(HavenError::rule(name, "caching handlers require cache_name"))
            }
            _ => Ok(()),
        }
    }

    /// Whether this rule applies to the request
    pub fn matches(&self, request: &Request) -> bool {
        if self.navigate_only && !request.is_navigation() {
            return false;
        }
        self.matches_method(request.method) && self.pattern.is_match(request.url.as_str())
    }

    fn matches_method(&self, method: Method) -> bool {
        if !self.methods.is_empty() {
            self.methods.contains(&method)
        } else if self.group == RuleGroup::Bypass {
            true
        } else {
            method == Method::Get
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> RuleGroup {
        self.group
    }

    pub fn is_bypass(&self) -> bool {
        self.group == RuleGroup::Bypass
    }

    /// Strategy to run; `None` only for bypass rules
    pub fn handler(&self) -> Option<StrategyKind> {
        self.handler
    }

    /// Logical bucket name, without version
    pub fn cache_name(&self) -> Option<&str> {
        self.cache_name.as_deref()
    }

    /// Physical bucket name for a version token
    pub fn bucket(&self, version: &str) -> Option<String> {
        self.cache_name.as_deref().map(|c| bucket_name(c, version))
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout
    }

    pub fn expiration(&self) -> &Expiration {
        &self.expiration
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}
