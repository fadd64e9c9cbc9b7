//! Backend tests against real services.
//!
//! - Marked `#[ignore]`; run with `cargo test -- --ignored`.
//! - Redis is read from `REDIS_HOST`/`REDIS_PORT` (default `127.0.0.1:6379`).
//! - Postgres tests use `DATABASE_URL` via `sqlx::test`.

use std::time::Duration;

use edgecache::{
    application::repos::OriginsRepo,
    cache::CacheBackend,
    config::RedisSettings,
    domain::origin::{OriginServer, SiteIdentifier},
    infra::{db::PostgresRepositories, redis::RedisBackend},
};
use sqlx::PgPool;
use uuid::Uuid;

async fn redis() -> RedisBackend {
    let settings = RedisSettings {
        host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: std::env::var("REDIS_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(6379),
        password: std::env::var("REDIS_PASSWORD").ok(),
    };
    RedisBackend::connect(&settings).await.expect("redis reachable")
}

#[tokio::test]
#[ignore]
async fn redis_lease_primitives() {
    let backend = redis().await;
    backend.ping().await.expect("ping");
    let key = format!("edgecache:test:{}", Uuid::new_v4());

    assert!(backend.set_nx(&key, b"owner-a", Duration::from_secs(5)).await.expect("set nx"));
    assert!(!backend.set_nx(&key, b"owner-b", Duration::from_secs(5)).await.expect("set nx"));
    assert!(!backend.delete_if_equals(&key, b"owner-b").await.expect("cad"));
    assert!(backend.delete_if_equals(&key, b"owner-a").await.expect("cad"));
    assert!(backend.get(&key).await.expect("get").is_none());
}

#[tokio::test]
#[ignore]
async fn redis_values_and_sorted_sets() {
    let backend = redis().await;
    let key = format!("edgecache:test:{}", Uuid::new_v4());
    let set = format!("edgecache:test-index:{}", Uuid::new_v4());

    backend
        .set(&key, &[0, 159, 146, 150], Duration::from_secs(5))
        .await
        .expect("set");
    assert_eq!(
        backend.get(&key).await.expect("get").as_deref(),
        Some(&[0u8, 159, 146, 150][..])
    );

    backend.sorted_add(&set, "early", 10).await.expect("zadd");
    backend.sorted_add(&set, "late", 1000).await.expect("zadd");
    assert_eq!(
        backend.sorted_range_up_to(&set, 500).await.expect("range"),
        vec!["early".to_string()]
    );
    assert_eq!(backend.sorted_score(&set, "late").await.expect("zscore"), Some(1000));
    assert!(
        !backend
            .sorted_remove_if_score_at_most(&set, "late", 500)
            .await
            .expect("conditional zrem")
    );
    assert!(
        backend
            .sorted_remove_if_score_at_most(&set, "early", 500)
            .await
            .expect("conditional zrem")
    );
    assert!(
        backend
            .sorted_remove_if_score_at_most(&set, "late", 1000)
            .await
            .expect("conditional zrem")
    );
    assert_eq!(backend.sorted_score(&set, "late").await.expect("zscore"), None);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn postgres_origins_insert_if_absent(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    repos.health_check().await.expect("healthy");

    let first = OriginServer::parse("site1", "http://origin.example").expect("origin");
    let second = OriginServer::parse("site1", "http://elsewhere.example").expect("origin");

    assert!(repos.insert_if_absent(&first).await.expect("insert"));
    assert!(!repos.insert_if_absent(&second).await.expect("insert"));

    let stored = repos
        .find_by_site(&SiteIdentifier::parse("site1").expect("site"))
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(stored.origin_url.as_str(), "http://origin.example/");

    assert!(
        repos
            .find_by_site(&SiteIdentifier::parse("other").expect("site"))
            .await
            .expect("lookup")
            .is_none()
    );
}
