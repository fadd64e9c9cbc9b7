//! In-process origin registry, used when no database is configured.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::application::repos::{OriginsRepo, RepoError};
use crate::domain::origin::{OriginServer, SiteIdentifier};

#[derive(Debug, Default)]
pub struct InMemoryOrigins {
    origins: DashMap<SiteIdentifier, OriginServer>,
}

impl InMemoryOrigins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

#[async_trait]
impl OriginsRepo for InMemoryOrigins {
    async fn find_by_site(&self, site: &SiteIdentifier) -> Result<Option<OriginServer>, RepoError> {
        Ok(self.origins.get(site).map(|entry| entry.value().clone()))
    }

    async fn insert_if_absent(&self, origin: &OriginServer) -> Result<bool, RepoError> {
        match self.origins.entry(origin.site_identifier.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(origin.clone());
                Ok(true)
            }
        }
    }
}
