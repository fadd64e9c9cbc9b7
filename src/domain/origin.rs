//! Origin servers and the identifiers sites are registered under.
//!
//! A site identifier is the first path segment of every proxied request, so it
//! is restricted to a conservative URL-safe alphabet.

use std::fmt;
use std::str::FromStr;

use url::Url;

use super::error::DomainError;

const MAX_SITE_IDENTIFIER_LEN: usize = 64;

/// Validated site identifier (`[A-Za-z0-9._-]{1,64}`, never `.` or `..`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteIdentifier(String);

impl SiteIdentifier {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        if raw.is_empty() {
            return Err(DomainError::invalid_site_identifier(raw, "must not be empty"));
        }
        if raw.len() > MAX_SITE_IDENTIFIER_LEN {
            return Err(DomainError::invalid_site_identifier(
                raw,
                "must be at most 64 characters",
            ));
        }
        if raw == "." || raw == ".." {
            return Err(DomainError::invalid_site_identifier(
                raw,
                "must not be a relative path segment",
            ));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(DomainError::invalid_site_identifier(
                raw,
                "may only contain ASCII letters, digits, `-`, `_` and `.`",
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SiteIdentifier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SiteIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SiteIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An upstream server registered under a site identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginServer {
    pub site_identifier: SiteIdentifier,
    pub origin_url: Url,
}

impl OriginServer {
    pub fn new(site_identifier: SiteIdentifier, origin_url: Url) -> Self {
        Self {
            site_identifier,
            origin_url,
        }
    }

    /// Validate raw registration input into an origin record.
    pub fn parse(site_identifier: &str, origin_url: &str) -> Result<Self, DomainError> {
        let site_identifier = SiteIdentifier::parse(site_identifier)?;
        let origin_url = parse_origin_url(origin_url)?;
        Ok(Self::new(site_identifier, origin_url))
    }

    /// Absolute upstream URL for a cleaned resource path (`/a/b.css`).
    pub fn resource_url(&self, resource_path: &str) -> String {
        let base = self.origin_url.as_str().trim_end_matches('/');
        format!("{base}{resource_path}")
    }
}

/// Parse an origin base URL: absolute http(s) with a host and no query or fragment.
pub fn parse_origin_url(raw: &str) -> Result<Url, DomainError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)
        .map_err(|err| DomainError::invalid_origin_url(trimmed, err.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(DomainError::invalid_origin_url(
            trimmed,
            "scheme must be http or https",
        ));
    }
    if url.host_str().is_none() {
        return Err(DomainError::invalid_origin_url(trimmed, "host is required"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(DomainError::invalid_origin_url(
            trimmed,
            "query strings and fragments are not allowed",
        ));
    }

    Ok(url)
}
