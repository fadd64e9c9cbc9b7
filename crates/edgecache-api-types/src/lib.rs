//! Wire types for the edgecache registration endpoint.
//!
//! Field names follow the camelCase contract (`siteIdentifier`, `originURL`,
//! `apiKey`); the PascalCase spellings accepted by earlier clients are kept as
//! aliases on deserialization.

use serde::{Deserialize, Serialize};

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOriginRequest {
    #[serde(rename = "siteIdentifier", alias = "SiteIdentifier")]
    pub site_identifier: String,
    #[serde(rename = "originURL", alias = "OriginURL", alias = "originUrl")]
    pub origin_url: String,
    #[serde(rename = "apiKey", alias = "APIKey")]
    pub api_key: String,
}

/// Successful registration reply.
///
/// `created` is false when the identifier was already registered; the stored
/// origin is left untouched in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOriginResponse {
    pub message: String,
    pub created: bool,
}

/// Error body returned by the registration endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
