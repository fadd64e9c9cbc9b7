use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::{
        HeaderName, HeaderValue, StatusCode, Uri,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::application::{
    error::ProxyError,
    proxy::{AssetRequest, ServedAsset},
};

use super::{HttpState, backend_health_response};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Dimensions stay strings here so malformed values surface as a 400 with the
/// offending parameter instead of a generic query rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct TransformQuery {
    width: Option<String>,
    height: Option<String>,
}

pub(super) async fn serve_asset(
    State(state): State<HttpState>,
    uri: Uri,
    query: Result<Query<TransformQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return ProxyError::BadRequest(rejection.body_text()).into_response(),
    };

    let request = match AssetRequest::from_parts(
        uri.path(),
        query.width.as_deref(),
        query.height.as_deref(),
    ) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    match state.proxy.serve(&request).await {
        Ok(served) => build_asset_response(served),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn health(State(state): State<HttpState>) -> Response {
    backend_health_response(state.backend.ping().await)
}

fn build_asset_response(served: ServedAsset) -> Response {
    let ServedAsset {
        entry,
        cache_status,
    } = served;
    let len = entry.body.len();
    let mut response = (StatusCode::OK, entry.body).into_response();
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&entry.content_type) {
        headers.insert(CONTENT_TYPE, value);
    } else {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(X_CACHE, HeaderValue::from_static(cache_status.as_str()));

    response
}
