//! HTTP client for origin servers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::application::pipeline::{FetchError, OriginFetcher};

use super::error::InfraError;

const USER_AGENT: &str = concat!("edgecache/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
    max_body_bytes: u64,
}

impl ReqwestFetcher {
    pub fn new(request_timeout: Duration, max_body_bytes: u64) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|err| InfraError::configuration(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    pub fn from_settings(settings: &crate::config::OriginSettings) -> Result<Self, InfraError> {
        Self::new(settings.request_timeout, settings.max_body_bytes.get())
    }
}

fn map_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}

#[async_trait]
impl OriginFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut response = self.client.get(url).send().await.map_err(map_transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(url, status = status.as_u16(), "Origin refused request");
            return Err(FetchError::Status(status.as_u16()));
        }

        let limit = self.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(map_transport)? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn fetcher(limit: u64) -> ReqwestFetcher {
        ReqwestFetcher::new(Duration::from_secs(2), limit).expect("client")
    }

    #[tokio::test]
    async fn returns_body_on_ok() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/style.css");
                then.status(200).body("body{}");
            })
            .await;

        let body = fetcher(1024)
            .fetch(&server.url("/style.css"))
            .await
            .expect("body");
        assert_eq!(&body[..], b"body{}");
    }

    #[tokio::test]
    async fn non_ok_status_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/moved");
                then.status(301).header("location", "/elsewhere");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let client = fetcher(1024);
        assert!(matches!(
            client.fetch(&server.url("/missing")).await,
            Err(FetchError::Status(404))
        ));
        assert!(matches!(
            client.fetch(&server.url("/moved")).await,
            Err(FetchError::Status(_))
        ));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big.bin");
                then.status(200).body(vec![0u8; 4096]);
            })
            .await;

        assert!(matches!(
            fetcher(1024).fetch(&server.url("/big.bin")).await,
            Err(FetchError::TooLarge { limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn slow_origin_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow");
                then.status(200).delay(Duration::from_millis(500)).body("late");
            })
            .await;

        let client = ReqwestFetcher::new(Duration::from_millis(100), 1024).expect("client");
        assert!(matches!(
            client.fetch(&server.url("/slow")).await,
            Err(FetchError::Timeout)
        ));
    }
}
