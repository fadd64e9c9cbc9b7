use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "edgecache_cache_hit_total",
            Unit::Count,
            "Total number of requests served from the cache, by tier."
        );
        describe_counter!(
            "edgecache_cache_miss_total",
            Unit::Count,
            "Total number of requests that missed the cache."
        );
        describe_counter!(
            "edgecache_origin_fetch_total",
            Unit::Count,
            "Total number of origin fetches, by result."
        );
        describe_histogram!(
            "edgecache_origin_fetch_ms",
            Unit::Milliseconds,
            "Origin fetch latency in milliseconds."
        );
        describe_counter!(
            "edgecache_stampede_wait_total",
            Unit::Count,
            "Total number of backoff waits behind a populating peer."
        );
        describe_counter!(
            "edgecache_service_busy_total",
            Unit::Count,
            "Total number of requests that exhausted their retry budget."
        );
        describe_counter!(
            "edgecache_reaper_deleted_total",
            Unit::Count,
            "Total number of expired disk entries removed by the reaper."
        );
        describe_counter!(
            "edgecache_cache_write_skipped_total",
            Unit::Count,
            "Total number of cache writes skipped after a backend failure, by tier."
        );
    });
}
