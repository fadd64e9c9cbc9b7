//! Edge cache core.
//!
//! - [`keys`]: cache key derivation
//! - [`TieredStore`]: inline values in the shared backend, large payloads on disk
//! - [`StampedeGuard`]: per-key lease serialising concurrent misses
//! - [`CacheReaper`]: periodic removal of expired disk entries
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! spillover_threshold_bytes = 102400
//! default_ttl_seconds = 600
//!
//! [lock]
//! lease_ttl_seconds = 30
//! retry_attempts = 5
//! retry_backoff_ms = 200
//! ```

pub mod backend;
mod config;
pub mod disk;
pub mod entry;
mod guard;
pub mod keys;
mod lock;
mod memory;
mod reaper;
mod store;

pub use backend::{BackendError, CacheBackend};
pub use config::CacheConfig;
pub use disk::{DiskError, DiskStore};
pub use entry::{CacheEntry, Location, Tier};
pub use guard::{GuardError, Lease, StampedeGuard};
pub use keys::{CacheKey, KeyError, TransformParams, clean_path};
pub use memory::MemoryBackend;
pub use reaper::{CacheReaper, SweepReport};
pub use store::{DISK_INDEX_KEY, PutOutcome, StoreError, TieredStore};
