use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::pipeline::PipelineError, domain::error::DomainError, infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

/// Terminal failures of the asset request flow.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("no origin registered for site `{site}`")]
    OriginNotConfigured { site: String },
    #[error("origin fetch failed")]
    UpstreamFetchFailed(#[source] Box<dyn StdError + Send + Sync>),
    #[error("transform rejected")]
    TransformRejected(#[source] Box<dyn StdError + Send + Sync>),
    #[error("transform failed")]
    TransformFailed(#[source] Box<dyn StdError + Send + Sync>),
    #[error("storage failure during {context}")]
    StorageFailure {
        context: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("retry budget exhausted waiting for a concurrent populate")]
    ServiceBusy,
}

impl ProxyError {
    pub fn storage(
        context: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::StorageFailure {
            context,
            source: source.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::OriginNotConfigured { .. } | ProxyError::UpstreamFetchFailed(_) => {
                StatusCode::NOT_FOUND
            }
            ProxyError::TransformRejected(_)
            | ProxyError::TransformFailed(_)
            | ProxyError::StorageFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::ServiceBusy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "Invalid URL format",
            ProxyError::OriginNotConfigured { .. } => "Origin server not configured",
            ProxyError::UpstreamFetchFailed(_) => "File Not Found",
            ProxyError::TransformRejected(_) | ProxyError::TransformFailed(_) => {
                "Image Processing Error"
            }
            ProxyError::StorageFailure { .. } => "Internal Server Error",
            ProxyError::ServiceBusy => "Service Unavailable",
        }
    }
}

impl From<PipelineError> for ProxyError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Upstream { .. } => ProxyError::UpstreamFetchFailed(Box::new(error)),
            PipelineError::TransformRejected(_) => ProxyError::TransformRejected(Box::new(error)),
            PipelineError::TransformFailed(_) | PipelineError::Join(_) => {
                ProxyError::TransformFailed(Box::new(error))
            }
        }
    }
}

impl From<ProxyError> for HttpError {
    fn from(error: ProxyError) -> Self {
        HttpError::from_error(
            "application::proxy",
            error.status_code(),
            error.presentation_message(),
            &error,
        )
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        HttpError::from(self).into_response()
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
