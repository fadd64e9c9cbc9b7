mod common;

use std::time::Duration;

use common::{TestApp, TestOptions, noise_jpeg, noise_png};
use edgecache::{
    application::proxy::{AssetRequest, RetryPolicy},
    cache::Tier,
};
use httpmock::prelude::*;

fn key_for(path: &str, width: Option<&str>, height: Option<&str>) -> edgecache::cache::CacheKey {
    AssetRequest::from_parts(path, width, height)
        .expect("valid request")
        .cache_key()
}

#[tokio::test]
async fn css_is_minified_cached_and_served_from_cache() {
    let origin = MockServer::start_async().await;
    let css = origin
        .mock_async(|when, then| {
            when.method(GET).path("/a.css");
            then.status(200)
                .header("content-type", "text/css")
                .body("body {\n    color: red;\n}\n");
        })
        .await;

    let app = TestApp::new();
    app.register("site1", &origin.base_url()).await;

    let first = app.get("/site1/a.css").await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("content-type"), Some("text/css"));
    assert_eq!(first.header("x-cache"), Some("MISS"));
    assert!(first.text().contains("color:red"), "minified: {}", first.text());
    assert!(!first.text().contains('\n'));

    let second = app.get("/site1/a.css").await;
    assert_eq!(second.status, 200);
    assert_eq!(second.header("x-cache"), Some("HIT"));
    assert_eq!(second.body, first.body);

    css.assert_calls_async(1).await;

    let key = key_for("/site1/a.css", None, None);
    assert_eq!(key.as_str(), "site1:/a.css");
    let entry = app.store.get(&key).await.expect("read").expect("cached");
    assert_eq!(entry.tier(), Tier::Inline);
    assert_eq!(entry.body, first.body);
}

#[tokio::test]
async fn large_image_is_resized_and_stored_by_resulting_size() {
    let origin = MockServer::start_async().await;
    let png = noise_png(420, 420);
    assert!(png.len() > 500 * 1024, "fixture is {} bytes", png.len());
    origin
        .mock_async(|when, then| {
            when.method(GET).path("/photo.png");
            then.status(200).body(png.clone());
        })
        .await;

    let app = TestApp::new();
    app.register("site1", &origin.base_url()).await;

    let response = app.get("/site1/photo.png?width=100&height=100").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("image/png"));

    let resized = image::load_from_memory(&response.body).expect("decodable image");
    assert!(resized.width() <= 100 && resized.height() <= 100);
    assert!(resized.width() == 100 || resized.height() == 100);

    let key = key_for("/site1/photo.png", Some("100"), Some("100"));
    assert_eq!(key.as_str(), "site1:/photo.png?width=100&height=100");
    let entry = app.store.get(&key).await.expect("read").expect("cached");
    let expected_tier = if response.body.len() as u64 > app.store.spillover_threshold() {
        Tier::Disk
    } else {
        Tier::Inline
    };
    assert_eq!(entry.tier(), expected_tier);
    assert_eq!(entry.body, response.body);
}

#[tokio::test]
async fn large_jpeg_is_resized_and_stays_jpeg() {
    let origin = MockServer::start_async().await;
    let jpeg = noise_jpeg(800, 800);
    assert!(jpeg.len() > 500 * 1024, "fixture is {} bytes", jpeg.len());
    let photo = origin
        .mock_async(|when, then| {
            when.method(GET).path("/photo.jpg");
            then.status(200).body(jpeg.clone());
        })
        .await;

    let app = TestApp::new();
    app.register("site1", &origin.base_url()).await;

    let first = app.get("/site1/photo.jpg?width=100&height=100").await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("content-type"), Some("image/jpeg"));
    assert_eq!(first.header("x-cache"), Some("MISS"));
    assert!(first.body.starts_with(&[0xff, 0xd8]), "jpeg magic");
    assert!(first.body.len() < jpeg.len());

    let resized = image::load_from_memory(&first.body).expect("decodable image");
    assert_eq!((resized.width(), resized.height()), (100, 100));

    let second = app.get("/site1/photo.jpg?width=100&height=100").await;
    assert_eq!(second.header("x-cache"), Some("HIT"));
    assert_eq!(second.body, first.body);
    photo.assert_calls_async(1).await;
}

#[tokio::test]
async fn large_payload_spills_to_disk_and_round_trips() {
    let origin = MockServer::start_async().await;
    let payload = vec![0x5au8; 200 * 1024];
    origin
        .mock_async(|when, then| {
            when.method(GET).path("/blob.bin");
            then.status(200).body(payload.clone());
        })
        .await;

    let app = TestApp::new();
    app.register("site1", &origin.base_url()).await;

    let first = app.get("/site1/blob.bin").await;
    assert_eq!(first.status, 200);
    assert_eq!(first.body.len(), payload.len());

    let entry = app
        .store
        .get(&key_for("/site1/blob.bin", None, None))
        .await
        .expect("read")
        .expect("cached");
    assert_eq!(entry.tier(), Tier::Disk);

    let second = app.get("/site1/blob.bin").await;
    assert_eq!(second.header("x-cache"), Some("HIT"));
    assert_eq!(&second.body[..], &payload[..]);
}

#[tokio::test]
async fn concurrent_misses_reach_the_origin_once() {
    let origin = MockServer::start_async().await;
    let slow = origin
        .mock_async(|when, then| {
            when.method(GET).path("/app.js");
            then.status(200)
                .delay(Duration::from_millis(300))
                .body("function add(a, b) { return a + b; }");
        })
        .await;

    let app = TestApp::new();
    app.register("site1", &origin.base_url()).await;

    let requests = (0..8).map(|_| app.get("/site1/app.js"));
    let responses = futures::future::join_all(requests).await;

    for response in &responses {
        assert_eq!(response.status, 200);
    }
    let misses = responses
        .iter()
        .filter(|response| response.header("x-cache") == Some("MISS"))
        .count();
    assert_eq!(misses, 1);
    slow.assert_calls_async(1).await;
}

#[tokio::test]
async fn waiting_behind_a_held_lease_exhausts_into_503() {
    let origin = MockServer::start_async().await;
    let asset = origin
        .mock_async(|when, then| {
            when.method(GET).path("/held.css");
            then.status(200).body("a{}");
        })
        .await;

    let app = TestApp::with_options(TestOptions {
        retry: RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(20),
        },
        ..Default::default()
    });
    app.register("site1", &origin.base_url()).await;

    let lease = app
        .guard
        .try_acquire(&key_for("/site1/held.css", None, None))
        .await
        .expect("backend")
        .expect("lease");

    let response = app.get("/site1/held.css").await;
    assert_eq!(response.status, 503);
    assert_eq!(response.text(), "Service Unavailable");
    asset.assert_calls_async(0).await;

    assert!(app.guard.release(lease).await);
    let response = app.get("/site1/held.css").await;
    assert_eq!(response.status, 200);
    asset.assert_calls_async(1).await;
}

#[tokio::test]
async fn unknown_site_and_missing_resource_are_404() {
    let origin = MockServer::start_async().await;
    let missing = origin
        .mock_async(|when, then| {
            when.method(GET).path("/missing.css");
            then.status(404);
        })
        .await;

    let app = TestApp::new();
    app.register("site1", &origin.base_url()).await;

    let unknown = app.get("/nosuchsite/a.css").await;
    assert_eq!(unknown.status, 404);
    assert_eq!(unknown.text(), "Origin server not configured");

    let response = app.get("/site1/missing.css").await;
    assert_eq!(response.status, 404);
    assert_eq!(response.text(), "File Not Found");

    // Upstream failures are not cached.
    let again = app.get("/site1/missing.css").await;
    assert_eq!(again.status, 404);
    missing.assert_calls_async(2).await;
}

#[tokio::test]
async fn malformed_requests_are_400() {
    let app = TestApp::new();

    for uri in ["/", "/site1", "/site1/a.png?width=abc", "/bad%20site/a.css"] {
        let response = app.get(uri).await;
        assert_eq!(response.status, 400, "{uri}");
        assert_eq!(response.text(), "Invalid URL format", "{uri}");
    }
}

#[tokio::test]
async fn image_dimension_bound_is_inclusive() {
    let origin = MockServer::start_async().await;
    let png = noise_png(16, 16);
    origin
        .mock_async(|when, then| {
            when.method(GET).path("/icon.png");
            then.status(200).body(png.clone());
        })
        .await;

    let app = TestApp::new();
    app.register("site1", &origin.base_url()).await;

    let rejected = app.get("/site1/icon.png?width=2001").await;
    assert_eq!(rejected.status, 500);
    assert_eq!(rejected.text(), "Image Processing Error");
    assert!(
        app.store
            .get(&key_for("/site1/icon.png", Some("2001"), None))
            .await
            .expect("read")
            .is_none()
    );

    let accepted = app.get("/site1/icon.png?width=2000").await;
    assert_eq!(accepted.status, 200);
    let image = image::load_from_memory(&accepted.body).expect("decodable image");
    assert_eq!((image.width(), image.height()), (16, 16));
}

#[tokio::test]
async fn transform_params_are_part_of_the_key() {
    let origin = MockServer::start_async().await;
    let png = noise_png(64, 64);
    let mock = origin
        .mock_async(|when, then| {
            when.method(GET).path("/logo.png");
            then.status(200).body(png.clone());
        })
        .await;

    let app = TestApp::new();
    app.register("site1", &origin.base_url()).await;

    let small = app.get("/site1/logo.png?width=32").await;
    let smaller = app.get("/site1/logo.png?width=16").await;
    let ignored = app.get("/site1/logo.png?width=32&utm_source=mail").await;

    assert_eq!(small.header("x-cache"), Some("MISS"));
    assert_eq!(smaller.header("x-cache"), Some("MISS"));
    assert_eq!(ignored.header("x-cache"), Some("HIT"));
    mock.assert_calls_async(2).await;
}

#[tokio::test]
async fn responses_carry_security_headers() {
    let app = TestApp::new();
    let response = app.get("/nosuchsite/a.css").await;

    assert_eq!(
        response.header("strict-transport-security"),
        Some("max-age=63072000; includeSubDomains")
    );
    assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(response.header("x-frame-options"), Some("DENY"));
    assert_eq!(
        response.header("content-security-policy"),
        Some("default-src 'self'")
    );
}

#[tokio::test]
async fn health_reports_backend_reachability() {
    let app = TestApp::new();
    let response = app.get("/_health").await;
    assert_eq!(response.status, 204);
}
