//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::origin::{OriginServer, SiteIdentifier};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Registry mapping site identifiers to origin servers.
#[async_trait]
pub trait OriginsRepo: Send + Sync {
    async fn find_by_site(&self, site: &SiteIdentifier) -> Result<Option<OriginServer>, RepoError>;

    /// Insert unless the identifier is already registered. Returns `true` when
    /// a new record was created; existing records are never modified.
    async fn insert_if_absent(&self, origin: &OriginServer) -> Result<bool, RepoError>;
}
