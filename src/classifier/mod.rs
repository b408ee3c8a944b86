//! Request classifier
//!
//! An ordered rule table mapping method+URL to a strategy and bucket.
//! Rules are evaluated group by group in the order below, and in table
//! order within a group. The first matching rule wins; matches are never
//! merged.
//!
//! | Order | Group | Typical handler |
//! |-------|-------|-----------------|
//! | 1 | bypass | not intercepted |
//! | 2 | static | CacheFirst / StaleWhileRevalidate |
//! | 3 | image | CacheFirst |
//! | 4 | versioned-data | NetworkFirst |
//! | 5 | read-api | NetworkFirst |
//! | 6 | mutating-api | NetworkOnly |
//! | 7 | navigation | NetworkFirst + offline document |

mod rule;

pub use rule::Rule;

use crate::config::RuleConfig;
use crate::error::{HavenError, HavenResult};
use crate::http::Request;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Rule priority group; declaration order is evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleGroup {
    Bypass,
    Static,
    Image,
    VersionedData,
    ReadApi,
    MutatingApi,
    Navigation,
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Bypass => "bypass",
            Self::Static => "static",
            Self::Image => "image",
            Self::VersionedData => "versioned-data",
            Self::ReadApi => "read-api",
            Self::MutatingApi => "mutating-api",
            Self::Navigation => "navigation",
        };
        f.write_str(label)
    }
}

/// The compiled, ordered rule table
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Compile a rule table, failing on the first invalid rule
    pub fn from_config(rules: &[RuleConfig]) -> HavenResult<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for config in rules {
            let rule = Rule::compile(config)?;
            if !seen.insert(rule.name().to_string()) {
                return Err(HavenError::rule(rule.name(), "duplicate rule name"));
            }
            compiled.push(rule);
        }

        // Stable: table order is kept within a group
        compiled.sort_by_key(Rule::group);

        Ok(Self { rules: compiled })
    }

    /// First rule matching the request, if any
    pub fn classify(&self, request: &Request) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(request))
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Distinct logical bucket names referenced by the table
    pub fn cache_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.iter().filter_map(Rule::cache_name).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
