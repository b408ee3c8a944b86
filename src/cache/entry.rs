//! Cache entries and per-bucket expiration policy

use crate::http::{Response, ResponseSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capacity and age limits applied to a bucket at write/read time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiration {
    /// Maximum number of entries; the oldest insertion is evicted first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,

    /// Maximum age before an entry is stale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u64>,
}

/// A stored response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request key (URL without fragment)
    pub key: String,

    pub status: u16,

    pub headers: BTreeMap<String, String>,

    #[serde(with = "hex_body")]
    pub body: Vec<u8>,

    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Snapshot a response for storage
    pub fn from_response(key: impl Into<String>, response: &Response, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at: now,
        }
    }

    /// Rebuild the response served from cache
    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            source: ResponseSource::Cache,
        }
    }

    /// Age in whole seconds (clock skew counts as zero)
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.stored_at).num_seconds().max(0) as u64
    }

    /// Whether the entry has outlived `max_age_seconds`
    pub fn is_expired(&self, now: DateTime<Utc>, expiration: &Expiration) -> bool {
        match expiration.max_age_seconds {
            Some(max_age) => self.age_secs(now) >= max_age,
            None => false,
        }
    }

    /// Bytes counted against the storage quota
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Physical bucket name for a logical name and version token
pub fn bucket_name(logical: &str, version: &str) -> String {
    format!("{}-{}", logical, version)
}

/// Bucket names are also file names in the disk store
pub fn is_valid_bucket_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.')
}

/// Bodies are stored hex-encoded so snapshots stay valid JSON text
mod hex_body {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
