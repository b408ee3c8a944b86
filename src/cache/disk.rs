//! On-disk cache storage
//!
//! Each bucket is one JSON file (`<bucket>.json`) holding its entries in
//! insertion order. Reads are served from memory; every mutation rewrites
//! the affected bucket file. File writes are serialized by one async lock,
//! and each flush snapshots memory while holding it.

use crate::cache::entry::{is_valid_bucket_name, CacheEntry, Expiration};
use crate::cache::storage::{CacheStorage, MemoryStorage};
use crate::error::{HavenError, HavenResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Serialized form of one bucket
#[derive(Debug, Serialize, Deserialize)]
struct BucketSnapshot {
    name: String,
    entries: Vec<CacheEntry>,
}

/// Cache storage persisted to a directory
pub struct DiskStorage {
    dir: PathBuf,
    memory: MemoryStorage,
    /// Held for every bucket file write, rename and removal
    files: Mutex<()>,
}

impl DiskStorage {
    /// Open (or create) a store rooted at `dir`, loading every bucket file
    pub async fn open_dir(dir: impl Into<PathBuf>, quota_bytes: Option<u64>) -> HavenResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| HavenError::io(format!("creating cache directory {}", dir.display()), e))?;

        let memory = match quota_bytes {
            Some(quota) => MemoryStorage::with_quota(quota),
            None => MemoryStorage::new(),
        };

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| HavenError::io("reading cache directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HavenError::io("reading cache directory entry", e))?
        {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match Self::read_snapshot(&path).await {
                Ok(snapshot) => memory.restore(&snapshot.name, snapshot.entries),
                // A corrupt bucket file is dropped rather than failing the whole store
                Err(e) => warn!("Skipping unreadable bucket file {}: {}", path.display(), e),
            }
        }

        Ok(Self {
            dir,
            memory,
            files: Mutex::new(()),
        })
    }

    /// Root directory of the store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_snapshot(path: &Path) -> HavenResult<BucketSnapshot> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| HavenError::io(format!("reading bucket file {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn bucket_path(&self, bucket: &str) -> HavenResult<PathBuf> {
        if !is_valid_bucket_name(bucket) {
            return Err(HavenError::BucketNameInvalid(bucket.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", bucket)))
    }

    /// Rewrite a bucket file from memory
    ///
    /// A bucket deleted in the meantime is not written back.
    async fn flush(&self, bucket: &str) -> HavenResult<()> {
        let path = self.bucket_path(bucket)?;
        let _files = self.files.lock().await;
        if !self.memory.contains(bucket) {
            debug!("Bucket {} was deleted before flush", bucket);
            return Ok(());
        }
        let snapshot = BucketSnapshot {
            name: bucket.to_string(),
            entries: self.memory.entries(bucket).await?,
        };
        let content = serde_json::to_string(&snapshot)?;

        // Write to a sibling file first so a crash never leaves a truncated bucket
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| HavenError::CacheWrite {
                bucket: bucket.to_string(),
                reason: e.to_string(),
            })?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| HavenError::CacheWrite {
                bucket: bucket.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Flushed bucket {} to {}", bucket, path.display());
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, bucket: &str) -> HavenResult<()> {
        let path = self.bucket_path(bucket)?;
        self.memory.open(bucket).await?;
        if !path.exists() {
            self.flush(bucket).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> HavenResult<Vec<String>> {
        self.memory.keys().await
    }

    async fn delete(&self, bucket: &str) -> HavenResult<bool> {
        let path = self.bucket_path(bucket)?;
        let _files = self.files.lock().await;
        let existed = self.memory.delete(bucket).await?;
        if path.exists() {
            fs::remove_file(&path).await.map_err(|e| {
                HavenError::io(format!("removing bucket file {}", path.display()), e)
            })?;
        }
        Ok(existed)
    }

    async fn get(&self, bucket: &str, key: &str) -> HavenResult<Option<CacheEntry>> {
        self.memory.get(bucket, key).await
    }

    async fn put(&self, bucket: &str, entry: CacheEntry, expiration: &Expiration) -> HavenResult<()> {
        self.bucket_path(bucket)?;
        self.memory.put(bucket, entry, expiration).await?;
        self.flush(bucket).await
    }

    async fn remove(&self, bucket: &str, key: &str) -> HavenResult<bool> {
        let removed = self.memory.remove(bucket, key).await?;
        if removed {
            self.flush(bucket).await?;
        }
        Ok(removed)
    }

    async fn entries(&self, bucket: &str) -> HavenResult<Vec<CacheEntry>> {
        self.memory.entries(bucket).await
    }
}
