//! Fetch-classify-transform pipeline for origin resources.
//!
//! The pipeline performs network I/O through an [`OriginFetcher`] and runs the
//! CPU-bound transforms on the blocking pool. It never touches the cache;
//! storing the result is the caller's job.

mod classify;
mod minify;
mod resize;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::TransformParams;

pub use classify::{ContentKind, classify, sniff};
pub use minify::Minifier;
pub use resize::{ImageResizer, ResizeError};

const METRIC_ORIGIN_FETCH_TOTAL: &str = "edgecache_origin_fetch_total";
const METRIC_ORIGIN_FETCH_MS: &str = "edgecache_origin_fetch_ms";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("origin request failed: {0}")]
    Transport(String),
    #[error("origin answered with status {0}")]
    Status(u16),
    #[error("origin response exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("origin request timed out")]
    Timeout,
}

/// Issues GET requests against origin servers.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Fetch the full body of `url`. Anything other than `200 OK` is an error.
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub max_image_dimension: u32,
    pub minify: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_image_dimension: 2000,
            minify: true,
        }
    }
}

impl From<&crate::config::Settings> for PipelineConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            max_image_dimension: settings.origin.max_image_dimension.get(),
            minify: settings.origin.minify,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to fetch `{url}` from origin")]
    Upstream {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    TransformRejected(ResizeError),
    #[error("image transform failed")]
    TransformFailed(#[source] ResizeError),
    #[error("transform task aborted: {0}")]
    Join(String),
}

impl From<ResizeError> for PipelineError {
    fn from(err: ResizeError) -> Self {
        match err {
            ResizeError::TooLarge { .. } => PipelineError::TransformRejected(err),
            other => PipelineError::TransformFailed(other),
        }
    }
}

/// Final bytes and content type of a processed resource.
#[derive(Debug, Clone)]
pub struct ProcessedContent {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Clone)]
pub struct ContentPipeline {
    fetcher: Arc<dyn OriginFetcher>,
    minifier: Minifier,
    resizer: ImageResizer,
}

impl ContentPipeline {
    pub fn new(fetcher: Arc<dyn OriginFetcher>, config: PipelineConfig) -> Self {
        Self {
            fetcher,
            minifier: Minifier::new(config.minify),
            resizer: ImageResizer::new(config.max_image_dimension),
        }
    }

    /// Fetch `origin_url`, classify it by `resource_path` (or its body), and
    /// apply the transform matching its kind.
    pub async fn fetch_and_process(
        &self,
        origin_url: &str,
        resource_path: &str,
        params: &TransformParams,
    ) -> Result<ProcessedContent, PipelineError> {
        let started_at = Instant::now();
        let fetched = self.fetcher.fetch(origin_url).await;
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_ORIGIN_FETCH_MS).record(elapsed_ms);

        let body = match fetched {
            Ok(body) => {
                counter!(METRIC_ORIGIN_FETCH_TOTAL, "result" => "ok").increment(1);
                body
            }
            Err(source) => {
                counter!(METRIC_ORIGIN_FETCH_TOTAL, "result" => "error").increment(1);
                warn!(url = origin_url, error = %source, elapsed_ms, "Origin fetch failed");
                return Err(PipelineError::Upstream {
                    url: origin_url.to_string(),
                    source,
                });
            }
        };

        let content_type = classify(resource_path, &body);
        let kind = ContentKind::of(&content_type);
        debug!(
            url = origin_url,
            content_type,
            size_bytes = body.len(),
            elapsed_ms,
            "Fetched origin resource"
        );

        let body = match kind {
            ContentKind::Css | ContentKind::JavaScript if self.minifier.is_enabled() => {
                let minifier = self.minifier;
                run_blocking(move || minifier.minify(kind, body)).await?
            }
            ContentKind::RasterImage(format) if !params.is_empty() => {
                self.resizer.check(params)?;
                let resizer = self.resizer;
                let params = *params;
                run_blocking(move || resizer.resize(body, format, &params)).await??
            }
            _ => body,
        };

        Ok(ProcessedContent { body, content_type })
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| PipelineError::Join(err.to_string()))
}
