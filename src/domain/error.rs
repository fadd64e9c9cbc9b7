use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid site identifier `{value}`: {reason}")]
    InvalidSiteIdentifier { value: String, reason: &'static str },
    #[error("invalid origin url `{value}`: {reason}")]
    InvalidOriginUrl { value: String, reason: String },
}

impl DomainError {
    pub fn invalid_site_identifier(value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidSiteIdentifier {
            value: value.into(),
            reason,
        }
    }

    pub fn invalid_origin_url(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOriginUrl {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
