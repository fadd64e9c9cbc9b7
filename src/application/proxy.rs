//! Asset request flow.
//!
//! ```text
//! CacheCheck --hit--> Served
//!     | miss
//! OriginLookup --unknown--> OriginNotConfigured
//!     |
//! LockAttempt --won--> Populate (fetch, transform, store) --> Served | Error
//!     | lost
//! WaitRetry --budget left--> CacheCheck
//!     | exhausted
//! ServiceBusy
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::application::error::ProxyError;
use crate::application::pipeline::ContentPipeline;
use crate::application::repos::OriginsRepo;
use crate::cache::{
    CacheConfig, CacheEntry, CacheKey, StampedeGuard, TieredStore, TransformParams, clean_path,
};
use crate::domain::origin::{OriginServer, SiteIdentifier};

const METRIC_CACHE_HIT: &str = "edgecache_cache_hit_total";
const METRIC_CACHE_MISS: &str = "edgecache_cache_miss_total";
const METRIC_STAMPEDE_WAIT: &str = "edgecache_stampede_wait_total";
const METRIC_SERVICE_BUSY: &str = "edgecache_service_busy_total";

/// A decomposed `/{site}/{resource...}` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub site: SiteIdentifier,
    /// Cleaned path below the site, always starting with `/`.
    pub resource_path: String,
    pub params: TransformParams,
}

impl AssetRequest {
    pub fn from_parts(
        raw_path: &str,
        width: Option<&str>,
        height: Option<&str>,
    ) -> Result<Self, ProxyError> {
        let cleaned = clean_path(raw_path);
        let mut segments = cleaned.splitn(3, '/').skip(1);
        let (Some(site), Some(resource)) = (segments.next(), segments.next()) else {
            return Err(ProxyError::BadRequest(format!(
                "path `{cleaned}` has no resource below the site identifier"
            )));
        };

        let site = SiteIdentifier::parse(site)
            .map_err(|err| ProxyError::BadRequest(err.to_string()))?;
        let params = TransformParams::parse(width, height)
            .map_err(|err| ProxyError::BadRequest(err.to_string()))?;

        Ok(Self {
            site,
            resource_path: format!("/{resource}"),
            params,
        })
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::build(&self.site, &self.resource_path, &self.params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServedAsset {
    pub entry: CacheEntry,
    pub cache_status: CacheStatus,
}

/// How long a request waits behind a peer that holds the lease.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Cache re-checks after the first lost lock attempt.
    pub attempts: u32,
    pub backoff: Duration,
}

impl From<&CacheConfig> for RetryPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            backoff: config.retry_backoff,
        }
    }
}

#[derive(Clone)]
pub struct ProxyService {
    origins: Arc<dyn OriginsRepo>,
    store: Arc<TieredStore>,
    guard: StampedeGuard,
    pipeline: ContentPipeline,
    default_ttl: Duration,
    retry: RetryPolicy,
}

impl ProxyService {
    pub fn new(
        origins: Arc<dyn OriginsRepo>,
        store: Arc<TieredStore>,
        guard: StampedeGuard,
        pipeline: ContentPipeline,
        default_ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            origins,
            store,
            guard,
            pipeline,
            default_ttl,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }

    pub async fn serve(&self, request: &AssetRequest) -> Result<ServedAsset, ProxyError> {
        let key = request.cache_key();
        let mut origin: Option<OriginServer> = None;
        let mut waits = 0u32;

        loop {
            if let Some(entry) = self.cached(&key).await? {
                return Ok(hit(entry));
            }
            if waits == 0 {
                counter!(METRIC_CACHE_MISS).increment(1);
            }

            let origin_server = match &origin {
                Some(found) => found.clone(),
                None => {
                    let found = self.resolve_origin(&request.site).await?;
                    origin = Some(found.clone());
                    found
                }
            };

            let lease = self
                .guard
                .try_acquire(&key)
                .await
                .map_err(|err| ProxyError::storage("stampede lease acquire", err))?;
            if let Some(lease) = lease {
                let result = self.populate(&key, request, &origin_server).await;
                self.guard.release(lease).await;
                return result;
            }

            if waits >= self.retry.attempts {
                counter!(METRIC_SERVICE_BUSY).increment(1);
                warn!(cache_key = %key, waits, "Gave up waiting for concurrent populate");
                return Err(ProxyError::ServiceBusy);
            }
            waits += 1;
            counter!(METRIC_STAMPEDE_WAIT).increment(1);
            debug!(cache_key = %key, waits, "Lease held by a peer; waiting");
            tokio::time::sleep(self.retry.backoff).await;
        }
    }

    async fn cached(&self, key: &CacheKey) -> Result<Option<CacheEntry>, ProxyError> {
        self.store
            .get(key)
            .await
            .map_err(|err| ProxyError::storage("cache read", err))
    }

    async fn resolve_origin(&self, site: &SiteIdentifier) -> Result<OriginServer, ProxyError> {
        self.origins
            .find_by_site(site)
            .await
            .map_err(|err| ProxyError::storage("origin lookup", err))?
            .ok_or_else(|| ProxyError::OriginNotConfigured {
                site: site.to_string(),
            })
    }

    /// Runs while holding the lease, bounded by the lease TTL so the work never
    /// outlives the exclusion it relies on.
    async fn populate(
        &self,
        key: &CacheKey,
        request: &AssetRequest,
        origin: &OriginServer,
    ) -> Result<ServedAsset, ProxyError> {
        // A peer may have stored the entry between our miss and the lease.
        if let Some(entry) = self.cached(key).await? {
            return Ok(hit(entry));
        }

        let lease_ttl = self.guard.lease_ttl();
        match tokio::time::timeout(lease_ttl, self.fetch_and_store(key, request, origin)).await {
            Ok(result) => result,
            Err(_) => {
                counter!(METRIC_SERVICE_BUSY).increment(1);
                warn!(
                    cache_key = %key,
                    lease_ttl_ms = lease_ttl.as_millis() as u64,
                    "Populate exceeded the lease TTL"
                );
                Err(ProxyError::ServiceBusy)
            }
        }
    }

    async fn fetch_and_store(
        &self,
        key: &CacheKey,
        request: &AssetRequest,
        origin: &OriginServer,
    ) -> Result<ServedAsset, ProxyError> {
        let url = origin.resource_url(&request.resource_path);
        let processed = self
            .pipeline
            .fetch_and_process(&url, &request.resource_path, &request.params)
            .await?;

        let outcome = self
            .store
            .put(key, &processed.content_type, processed.body, self.default_ttl)
            .await
            .map_err(|err| ProxyError::storage("cache write", err))?;

        info!(
            cache_key = %key,
            tier = outcome.entry.tier().as_str(),
            size_bytes = outcome.entry.size_bytes,
            cached = outcome.cached,
            "Populated cache entry"
        );
        Ok(ServedAsset {
            entry: outcome.entry,
            cache_status: CacheStatus::Miss,
        })
    }
}

fn hit(entry: CacheEntry) -> ServedAsset {
    counter!(METRIC_CACHE_HIT, "tier" => entry.tier().as_str()).increment(1);
    ServedAsset {
        entry,
        cache_status: CacheStatus::Hit,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;
    use crate::application::pipeline::{FetchError, OriginFetcher, PipelineConfig};
    use crate::cache::{CacheBackend, DiskStore, MemoryBackend};
    use crate::infra::origins::InMemoryOrigins;

    #[test]
    fn paths_decompose_into_site_and_resource() {
        let request = AssetRequest::from_parts("/site1/css/../a.css", None, None).expect("valid");
        assert_eq!(request.site.as_str(), "site1");
        assert_eq!(request.resource_path, "/a.css");
        assert_eq!(request.cache_key().as_str(), "site1:/a.css");

        let request =
            AssetRequest::from_parts("/site1/photo.jpg", Some("100"), Some("100")).expect("valid");
        assert_eq!(
            request.cache_key().as_str(),
            "site1:/photo.jpg?width=100&height=100"
        );
    }

    #[test]
    fn malformed_paths_are_bad_requests() {
        for path in ["/", "/site1", "/site1/", "//", "/../site1"] {
            assert!(
                matches!(
                    AssetRequest::from_parts(path, None, None),
                    Err(ProxyError::BadRequest(_))
                ),
                "{path}"
            );
        }
        assert!(matches!(
            AssetRequest::from_parts("/site1/a.png", Some("big"), None),
            Err(ProxyError::BadRequest(_))
        ));
    }

    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl OriginFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Bytes::from_static(b"hello"))
        }
    }

    struct Harness {
        _dir: TempDir,
        backend: Arc<MemoryBackend>,
        fetcher: Arc<CountingFetcher>,
        service: ProxyService,
    }

    async fn harness(delay: Duration, lease_ttl: Duration) -> Harness {
        let dir = TempDir::new().expect("tempdir");
        let backend = Arc::new(MemoryBackend::default());
        let shared: Arc<dyn CacheBackend> = backend.clone();
        let store = Arc::new(TieredStore::new(
            shared.clone(),
            DiskStore::new(dir.path().to_path_buf()).expect("disk"),
            100 * 1024,
        ));
        let origins = Arc::new(InMemoryOrigins::new());
        origins
            .insert_if_absent(
                &OriginServer::parse("site1", "http://origin.example").expect("origin"),
            )
            .await
            .expect("insert");
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            delay,
        });
        let service = ProxyService::new(
            origins,
            store,
            StampedeGuard::new(shared, lease_ttl),
            ContentPipeline::new(fetcher.clone(), PipelineConfig::default()),
            Duration::from_secs(600),
            RetryPolicy {
                attempts: 5,
                backoff: Duration::from_millis(200),
            },
        );
        Harness {
            _dir: dir,
            backend,
            fetcher,
            service,
        }
    }

    fn request(path: &str) -> AssetRequest {
        AssetRequest::from_parts(path, None, None).expect("valid request")
    }

    #[tokio::test]
    async fn second_request_is_a_hit() {
        let h = harness(Duration::ZERO, Duration::from_secs(30)).await;
        let first = h.service.serve(&request("/site1/hello.txt")).await.expect("served");
        assert_eq!(first.cache_status, CacheStatus::Miss);
        let second = h.service.serve(&request("/site1/hello.txt")).await.expect("served");
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert_eq!(second.entry.body, first.entry.body);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_site_is_not_configured() {
        let h = harness(Duration::ZERO, Duration::from_secs(30)).await;
        let result = h.service.serve(&request("/other/a.css")).await;
        assert!(matches!(result, Err(ProxyError::OriginNotConfigured { .. })));
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn held_lease_exhausts_retry_budget() {
        let h = harness(Duration::ZERO, Duration::from_secs(30)).await;
        let req = request("/site1/hello.txt");
        h.backend
            .set_nx(&req.cache_key().lock_key(), b"peer", Duration::from_secs(30))
            .await
            .expect("lock");

        let started = tokio::time::Instant::now();
        let result = h.service.serve(&req).await;
        assert!(matches!(result, Err(ProxyError::ServiceBusy)));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1000), "{waited:?}");
        assert!(waited < Duration::from_millis(1200), "{waited:?}");
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_observes_the_populated_entry() {
        let h = harness(Duration::from_millis(300), Duration::from_secs(30)).await;
        let populate = {
            let service = h.service.clone();
            tokio::spawn(async move { service.serve(&request("/site1/hello.txt")).await })
        };
        tokio::task::yield_now().await;
        let waiter = h.service.serve(&request("/site1/hello.txt")).await.expect("waiter");
        let populated = populate.await.expect("join").expect("populated");

        let mut statuses = [waiter.cache_status.as_str(), populated.cache_status.as_str()];
        statuses.sort_unstable();
        assert_eq!(statuses, ["HIT", "MISS"]);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn populate_is_bounded_by_the_lease_ttl() {
        let h = harness(Duration::from_secs(60), Duration::from_secs(30)).await;
        let req = request("/site1/hello.txt");
        let result = h.service.serve(&req).await;
        assert!(matches!(result, Err(ProxyError::ServiceBusy)));
        assert!(
            h.backend
                .get(&req.cache_key().lock_key())
                .await
                .expect("get")
                .is_none()
        );
    }
}
