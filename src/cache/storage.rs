//! Cache storage abstraction and the in-memory store
//!
//! Buckets are created on first write, keep insertion order for FIFO
//! eviction, and are only ever deleted by the lifecycle controller.

use crate::cache::entry::{CacheEntry, Expiration};
use crate::error::{HavenError, HavenResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use tracing::debug;

/// Abstract cache storage
///
/// Implementations must tolerate concurrent writers to the same bucket;
/// capacity is enforced per write, best-effort.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the bucket if it doesn't exist
    async fn open(&self, bucket: &str) -> HavenResult<()>;

    /// Names of all existing buckets
    async fn keys(&self) -> HavenResult<Vec<String>>;

    /// Delete a whole bucket, returning whether it existed
    async fn delete(&self, bucket: &str) -> HavenResult<bool>;

    /// Look up an entry by request key
    async fn get(&self, bucket: &str, key: &str) -> HavenResult<Option<CacheEntry>>;

    /// Insert or replace an entry, evicting the oldest entries past `max_entries`
    async fn put(&self, bucket: &str, entry: CacheEntry, expiration: &Expiration) -> HavenResult<()>;

    /// Remove a single entry, returning whether it existed
    async fn remove(&self, bucket: &str, key: &str) -> HavenResult<bool>;

    /// All entries of a bucket, oldest insertion first
    async fn entries(&self, bucket: &str) -> HavenResult<Vec<CacheEntry>>;
}

/// One bucket: entries plus their insertion order
#[derive(Debug, Default)]
pub(crate) struct Bucket {
    order: VecDeque<String>,
    entries: HashMap<String, CacheEntry>,
}

impl Bucket {
    pub(crate) fn from_entries(entries: Vec<CacheEntry>) -> Self {
        let mut bucket = Self::default();
        for entry in entries {
            bucket.insert(entry, None);
        }
        bucket
    }

    /// Insert and return the keys evicted to make room
    pub(crate) fn insert(&mut self, entry: CacheEntry, max_entries: Option<usize>) -> Vec<String> {
        let key = entry.key.clone();
        if self.entries.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }

        let mut evicted = Vec::new();
        if let Some(max) = max_entries {
            while self.entries.len() >= max {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
                evicted.push(oldest);
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, entry);
        evicted
    }

    /// Bytes `insert` would evict to make room for `key`
    fn evicted_size(&self, key: &str, max_entries: Option<usize>) -> u64 {
        let Some(max) = max_entries else {
            return 0;
        };
        let mut remaining = self.entries.len() - usize::from(self.entries.contains_key(key));
        let mut freed = 0;
        for oldest in self.order.iter().filter(|k| k.as_str() != key) {
            if remaining < max {
                break;
            }
            freed += self.entries.get(oldest).map(CacheEntry::size).unwrap_or(0);
            remaining -= 1;
        }
        freed
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn ordered(&self) -> Vec<CacheEntry> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).cloned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn size(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

/// In-memory cache storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
    quota_bytes: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that refuses writes past `quota_bytes` of body data
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            buckets: RwLock::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Replace a bucket wholesale (used when loading snapshots)
    pub(crate) fn restore(&self, bucket: &str, entries: Vec<CacheEntry>) {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        buckets.insert(bucket.to_string(), Bucket::from_entries(entries));
    }

    pub(crate) fn contains(&self, bucket: &str) -> bool {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        buckets.contains_key(bucket)
    }

    /// Number of entries in a bucket (0 if missing)
    pub fn len(&self, bucket: &str) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        buckets.get(bucket).map(Bucket::len).unwrap_or(0)
    }

    fn check_quota(
        buckets: &HashMap<String, Bucket>,
        bucket: &str,
        entry: &CacheEntry,
        max_entries: Option<usize>,
        quota: u64,
    ) -> HavenResult<()> {
        let (replaced, evicted) = match buckets.get(bucket) {
            Some(b) => (
                b.get(&entry.key).map(CacheEntry::size).unwrap_or(0),
                b.evicted_size(&entry.key, max_entries),
            ),
            None => (0, 0),
        };
        let used: u64 = buckets.values().map(Bucket::size).sum();
        let needed = used.saturating_sub(replaced + evicted) + entry.size();

        if needed > quota {
            return Err(HavenError::QuotaExceeded {
                bucket: bucket.to_string(),
                needed,
                quota,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, bucket: &str) -> HavenResult<()> {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn keys(&self) -> HavenResult<Vec<String>> {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = buckets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, bucket: &str) -> HavenResult<bool> {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        Ok(buckets.remove(bucket).is_some())
    }

    async fn get(&self, bucket: &str, key: &str) -> HavenResult<Option<CacheEntry>> {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    async fn put(&self, bucket: &str, entry: CacheEntry, expiration: &Expiration) -> HavenResult<()> {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        if let Some(quota) = self.quota_bytes {
            Self::check_quota(&buckets, bucket, &entry, expiration.max_entries, quota)?;
        }

        let evicted = buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(entry, expiration.max_entries);
        for key in evicted {
            debug!(bucket, key = %key, "Evicted oldest cache entry");
        }
        Ok(())
    }

    async fn remove(&self, bucket: &str, key: &str) -> HavenResult<bool> {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        Ok(buckets.get_mut(bucket).is_some_and(|b| b.remove(key)))
    }

    async fn entries(&self, bucket: &str) -> HavenResult<Vec<CacheEntry>> {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        Ok(buckets.get(bucket).map(Bucket::ordered).unwrap_or_default())
    }
}
