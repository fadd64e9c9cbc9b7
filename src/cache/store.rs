//! Tiered cache store.
//!
//! Payloads up to the spillover threshold are stored inline in the shared
//! backend. Larger payloads go to the [`DiskStore`]; the backend then only holds
//! a marker naming the file, and the file is recorded in the disk index sorted
//! by expiry so the reaper can find it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::backend::{BackendError, CacheBackend};
use super::disk::{DiskError, DiskStore};
use super::entry::{CacheEntry, EntryMeta, Location, StoredValue, unix_millis};
use super::keys::CacheKey;

/// Sorted set of disk-resident files, scored by expiry in unix milliseconds.
pub const DISK_INDEX_KEY: &str = "edgecache:disk_index";

const METRIC_CACHE_WRITE_SKIPPED: &str = "edgecache_cache_write_skipped_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Disk(#[from] DiskError),
}

/// Result of a successful [`TieredStore::put`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub entry: CacheEntry,
    /// `false` when the small-value write failed and the entry will not be
    /// served from cache.
    pub cached: bool,
}

pub struct TieredStore {
    backend: Arc<dyn CacheBackend>,
    disk: DiskStore,
    spillover_threshold: u64,
}

impl TieredStore {
    pub fn new(backend: Arc<dyn CacheBackend>, disk: DiskStore, spillover_threshold: u64) -> Self {
        Self {
            backend,
            disk,
            spillover_threshold,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    pub fn spillover_threshold(&self) -> u64 {
        self.spillover_threshold
    }

    /// Look up an entry. Absent, expired and unreadable records are all `Ok(None)`.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let Some(raw) = self.backend.get(key.as_str()).await? else {
            return Ok(None);
        };

        let stored = match StoredValue::decode(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(cache_key = %key, error = %err, "Discarding undecodable cache record");
                return Ok(None);
            }
        };

        if stored.meta().expires_at <= OffsetDateTime::now_utc() {
            return Ok(None);
        }

        match stored {
            StoredValue::Inline { meta, body } => Ok(Some(entry(meta, Location::Inline, body))),
            StoredValue::Spilled { meta, file_name } => {
                let path = match self.disk.path_for(&file_name) {
                    Ok(path) => path,
                    Err(err) => {
                        warn!(cache_key = %key, error = %err, "Discarding cache marker with invalid file name");
                        return Ok(None);
                    }
                };
                match self.disk.read(&file_name).await? {
                    Some(body) => Ok(Some(entry(meta, Location::Disk { path }, body))),
                    None => {
                        debug!(cache_key = %key, file_name, "Cache marker points at a missing file");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Store a payload for `ttl`.
    ///
    /// A failed inline write is logged and reported through
    /// [`PutOutcome::cached`]. Any failure on the disk path is returned, since
    /// the marker must never reference a file that was not written.
    pub async fn put(
        &self,
        key: &CacheKey,
        content_type: &str,
        body: Bytes,
        ttl: Duration,
    ) -> Result<PutOutcome, StoreError> {
        let stored_at = OffsetDateTime::now_utc();
        let meta = EntryMeta {
            content_type: content_type.to_string(),
            size_bytes: body.len() as u64,
            stored_at,
            expires_at: stored_at + ttl,
        };

        if meta.size_bytes <= self.spillover_threshold {
            let record = StoredValue::Inline {
                meta: meta.clone(),
                body: body.clone(),
            }
            .encode();
            let cached = self.set_record(key, &record, ttl, "inline").await;
            return Ok(PutOutcome {
                entry: entry(meta, Location::Inline, body),
                cached,
            });
        }

        let file_name = DiskStore::file_name_for(key);
        self.backend
            .sorted_add(DISK_INDEX_KEY, &file_name, unix_millis(meta.expires_at))
            .await?;
        let path = self.disk.write(&file_name, &body).await?;

        let record = StoredValue::Spilled {
            meta: meta.clone(),
            file_name,
        }
        .encode();
        let cached = self.set_record(key, &record, ttl, "disk").await;
        Ok(PutOutcome {
            entry: entry(meta, Location::Disk { path }, body),
            cached,
        })
    }

    async fn set_record(
        &self,
        key: &CacheKey,
        record: &[u8],
        ttl: Duration,
        tier: &'static str,
    ) -> bool {
        match self.backend.set(key.as_str(), record, ttl).await {
            Ok(()) => true,
            Err(err) => {
                counter!(METRIC_CACHE_WRITE_SKIPPED, "tier" => tier).increment(1);
                warn!(cache_key = %key, tier, error = %err, "Cache write failed; serving uncached");
                false
            }
        }
    }
}

fn entry(meta: EntryMeta, location: Location, body: Bytes) -> CacheEntry {
    CacheEntry {
        content_type: meta.content_type,
        size_bytes: meta.size_bytes,
        stored_at: meta.stored_at,
        expires_at: meta.expires_at,
        location,
        body,
    }
}
