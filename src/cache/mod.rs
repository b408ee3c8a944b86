//! Cache store: named, versioned buckets of request→response entries
//!
//! Bucket names carry the worker version token (`images-v8`), so a new
//! version never writes into an older version's buckets.
//!
//! # Policy
//!
//! | Limit | When applied | Effect |
//! |-------|--------------|--------|
//! | `max_entries` | on write | oldest insertion evicted first (FIFO) |
//! | `max_age_seconds` | on read | entry treated as stale |
//! | storage quota | on write | write rejected, response still served |

mod disk;
mod entry;
mod storage;

pub use disk::DiskStorage;
pub use entry::{bucket_name, is_valid_bucket_name, CacheEntry, Expiration};
pub use storage::{CacheStorage, MemoryStorage};
