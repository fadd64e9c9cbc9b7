//! Tuning knobs of the cache core, resolved from [`crate::config::Settings`].

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SPILLOVER_THRESHOLD_BYTES: u64 = 100 * 1024;
const DEFAULT_TTL_SECS: u64 = 600;
const DEFAULT_LEASE_TTL_SECS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 3600;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_DIRECTORY: &str = "./.cache";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Payloads larger than this many bytes are spilled to disk.
    pub spillover_threshold_bytes: u64,
    /// Lifetime of freshly populated entries.
    pub default_ttl: Duration,
    /// Lifetime of a stampede lease.
    pub lease_ttl: Duration,
    /// Cache re-checks a waiting request makes before giving up.
    pub retry_attempts: u32,
    /// Pause before each re-check.
    pub retry_backoff: Duration,
    pub reaper_interval: Duration,
    /// Entry bound of the in-process backend.
    pub memory_capacity: NonZeroUsize,
    /// Directory holding spilled payloads.
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            spillover_threshold_bytes: DEFAULT_SPILLOVER_THRESHOLD_BYTES,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            memory_capacity: NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            directory: PathBuf::from(DEFAULT_DIRECTORY),
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            spillover_threshold_bytes: settings.cache.spillover_threshold_bytes,
            default_ttl: settings.cache.default_ttl,
            lease_ttl: settings.lock.lease_ttl,
            retry_attempts: settings.lock.retry_attempts.get(),
            retry_backoff: settings.lock.retry_backoff,
            reaper_interval: settings.reaper.interval,
            memory_capacity: settings.cache.memory_capacity,
            directory: settings.cache.directory.clone(),
        }
    }
}
