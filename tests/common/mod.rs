//! Shared harness: the full router over an in-process backend, a temporary
//! cache directory and an in-memory origin registry.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header::CONTENT_TYPE},
};
use bytes::Bytes;
use edgecache::{
    application::{
        pipeline::{ContentPipeline, PipelineConfig},
        proxy::{ProxyService, RetryPolicy},
        registration::RegistrationService,
        repos::OriginsRepo,
    },
    cache::{CacheBackend, DiskStore, MemoryBackend, StampedeGuard, TieredStore},
    domain::origin::OriginServer,
    infra::{
        http::{HttpState, build_router},
        origin_client::ReqwestFetcher,
        origins::InMemoryOrigins,
    },
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";

#[derive(Debug, Clone)]
pub struct TestOptions {
    pub spillover_threshold: u64,
    pub default_ttl: Duration,
    pub lease_ttl: Duration,
    pub retry: RetryPolicy,
    pub origin_timeout: Duration,
    pub api_key: Option<String>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            spillover_threshold: 100 * 1024,
            default_ttl: Duration::from_secs(600),
            lease_ttl: Duration::from_secs(10),
            retry: RetryPolicy {
                attempts: 5,
                backoff: Duration::from_millis(200),
            },
            origin_timeout: Duration::from_secs(5),
            api_key: Some(API_KEY.to_string()),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub backend: Arc<MemoryBackend>,
    pub origins: Arc<InMemoryOrigins>,
    pub store: Arc<TieredStore>,
    pub guard: StampedeGuard,
    pub cache_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_options(TestOptions::default())
    }

    pub fn with_options(options: TestOptions) -> Self {
        let cache_dir = tempfile::tempdir().expect("cache dir");
        let backend = Arc::new(MemoryBackend::default());
        let shared: Arc<dyn CacheBackend> = backend.clone();
        let origins = Arc::new(InMemoryOrigins::new());

        let disk = DiskStore::new(cache_dir.path().to_path_buf()).expect("disk store");
        let store = Arc::new(TieredStore::new(
            shared.clone(),
            disk,
            options.spillover_threshold,
        ));
        let guard = StampedeGuard::new(shared.clone(), options.lease_ttl);
        let fetcher =
            ReqwestFetcher::new(options.origin_timeout, 64 * 1024 * 1024).expect("http client");
        let pipeline = ContentPipeline::new(Arc::new(fetcher), PipelineConfig::default());

        let proxy = Arc::new(ProxyService::new(
            origins.clone(),
            store.clone(),
            guard.clone(),
            pipeline,
            options.default_ttl,
            options.retry,
        ));
        let registration = Arc::new(RegistrationService::new(
            origins.clone(),
            options.api_key.clone(),
        ));

        let router = build_router(HttpState {
            proxy,
            registration,
            backend: shared,
        });

        Self {
            router,
            backend,
            origins,
            store,
            guard,
            cache_dir,
        }
    }

    pub async fn register(&self, site: &str, origin_url: &str) {
        let origin = OriginServer::parse(site, origin_url).expect("valid origin");
        self.origins
            .insert_if_absent(&origin)
            .await
            .expect("registered");
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should collect");
        TestResponse {
            status,
            headers,
            body,
        }
    }
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).expect("utf-8 body")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

fn noise_rgb(width: u32, height: u32) -> image::DynamicImage {
    let mut state: u32 = 0x9e37_79b9;
    let image = image::RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        };
        image::Rgb([next(), next(), next()])
    });
    image::DynamicImage::ImageRgb8(image)
}

/// A PNG of pseudo-random pixels; noise does not compress, so the encoded size
/// tracks `width * height * 3`.
pub fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let mut encoded = std::io::Cursor::new(Vec::new());
    noise_rgb(width, height)
        .write_to(&mut encoded, image::ImageFormat::Png)
        .expect("png encodes");
    encoded.into_inner()
}

/// A maximum-quality JPEG of pseudo-random pixels.
pub fn noise_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut encoded = Vec::new();
    noise_rgb(width, height)
        .write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut encoded,
            100,
        ))
        .expect("jpeg encodes");
    encoded
}
