mod middleware;
mod public;
mod register;

pub use middleware::RequestContext;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum::http::StatusCode;

use crate::application::{
    error::ErrorReport, proxy::ProxyService, registration::RegistrationService,
};
use crate::cache::{BackendError, CacheBackend};

use middleware::{log_responses, security_headers, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub proxy: Arc<ProxyService>,
    pub registration: Arc<RegistrationService>,
    pub backend: Arc<dyn CacheBackend>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/register", post(register::register_origin))
        .route("/_health", get(public::health))
        .route("/", get(public::serve_asset))
        .route("/{*path}", get(public::serve_asset))
        .with_state(state)
        .layer(axum_middleware::from_fn(security_headers))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

fn backend_health_response(result: Result<(), BackendError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
