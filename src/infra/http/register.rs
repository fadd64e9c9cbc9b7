use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use edgecache_api_types::{ErrorBody, RegisterOriginRequest, RegisterOriginResponse};

use crate::application::{error::ErrorReport, registration::RegistrationError};

use super::HttpState;

const SOURCE: &str = "infra::http::register";

pub(super) async fn register_origin(
    State(state): State<HttpState>,
    body: Result<Json<RegisterOriginRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid request body",
                ErrorReport::from_message(
                    SOURCE,
                    StatusCode::UNPROCESSABLE_ENTITY,
                    rejection.body_text(),
                ),
            );
        }
    };

    match state.registration.register(&request).await {
        Ok(outcome) => {
            let message = if outcome.created {
                "Origin server registered successfully"
            } else {
                "Origin server already registered"
            };
            Json(RegisterOriginResponse {
                message: message.to_string(),
                created: outcome.created,
            })
            .into_response()
        }
        Err(err) => registration_error_response(err),
    }
}

fn registration_error_response(err: RegistrationError) -> Response {
    let (status, public) = match &err {
        RegistrationError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        RegistrationError::Invalid(inner) => (StatusCode::UNPROCESSABLE_ENTITY, inner.to_string()),
        RegistrationError::Repo(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        ),
    };
    error_response(status, public, ErrorReport::from_error(SOURCE, status, &err))
}

fn error_response(status: StatusCode, public: impl Into<String>, report: ErrorReport) -> Response {
    let mut response = (
        status,
        Json(ErrorBody {
            error: public.into(),
        }),
    )
        .into_response();
    report.attach(&mut response);
    response
}
