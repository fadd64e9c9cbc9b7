//! Cache key derivation.
//!
//! A key is `{site}:{path}` with an optional `?width={w}&height={h}` suffix.
//! Only the transform parameters participate, in a fixed order, so unrelated
//! query parameters never fragment the cache. Site identifiers cannot contain
//! `:` and request paths never contain `?`, which keeps the encoding injective.

use std::fmt;

use thiserror::Error;

use crate::domain::origin::SiteIdentifier;

const LOCK_PREFIX: &str = "lock:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("query parameter `{name}` must be a non-negative integer, got `{value}`")]
    InvalidParam { name: &'static str, value: String },
}

/// Transform parameters recognised by the content pipeline.
///
/// `0` and empty values mean "not requested" and normalise to `None`, since
/// they produce the same content as omitting the parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TransformParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TransformParams {
    pub fn new(width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            width: width.filter(|w| *w > 0),
            height: height.filter(|h| *h > 0),
        }
    }

    pub fn parse(width: Option<&str>, height: Option<&str>) -> Result<Self, KeyError> {
        Ok(Self::new(
            parse_dimension("width", width)?,
            parse_dimension("height", height)?,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

fn parse_dimension(name: &'static str, raw: Option<&str>) -> Result<Option<u32>, KeyError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::InvalidParam {
            name,
            value: raw.to_string(),
        });
    }
    raw.parse::<u32>().map(Some).map_err(|_| KeyError::InvalidParam {
        name,
        value: raw.to_string(),
    })
}

/// Deterministic identifier of one logical cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for a site, a cleaned resource path and its transform parameters.
    pub fn build(site: &SiteIdentifier, resource_path: &str, params: &TransformParams) -> Self {
        let mut key = format!("{site}:{resource_path}");
        if !params.is_empty() {
            key.push_str("?width=");
            if let Some(width) = params.width {
                key.push_str(&width.to_string());
            }
            key.push_str("&height=");
            if let Some(height) = params.height {
                key.push_str(&height.to_string());
            }
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the stampede lease guarding this entry.
    pub fn lock_key(&self) -> String {
        format!("{LOCK_PREFIX}{}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lexically clean a request path: single leading slash, no empty, `.` or `..`
/// segments, no trailing slash. `..` never climbs above the root.
pub fn clean_path(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut cleaned = String::with_capacity(raw.len());
    for segment in segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    cleaned
}
