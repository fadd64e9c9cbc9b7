//! Origin registration.

use std::sync::Arc;

use edgecache_api_types::RegisterOriginRequest;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::info;

use crate::application::repos::{OriginsRepo, RepoError};
use crate::domain::error::DomainError;
use crate::domain::origin::OriginServer;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid or missing api key")]
    Unauthorized,
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub origin: OriginServer,
    /// `false` when the identifier was already registered.
    pub created: bool,
}

#[derive(Clone)]
pub struct RegistrationService {
    origins: Arc<dyn OriginsRepo>,
    api_key: Option<String>,
}

impl RegistrationService {
    /// Without an `api_key` every HTTP registration is rejected.
    pub fn new(origins: Arc<dyn OriginsRepo>, api_key: Option<String>) -> Self {
        Self { origins, api_key }
    }

    /// Authenticate and register. Existing identifiers are left untouched.
    pub async fn register(
        &self,
        request: &RegisterOriginRequest,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        if !self.authorized(&request.api_key) {
            return Err(RegistrationError::Unauthorized);
        }
        self.register_trusted(&request.site_identifier, &request.origin_url)
            .await
    }

    /// Register without an api key check, for operator tooling.
    pub async fn register_trusted(
        &self,
        site_identifier: &str,
        origin_url: &str,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let origin = OriginServer::parse(site_identifier, origin_url)?;
        let created = self.origins.insert_if_absent(&origin).await?;
        info!(
            site = %origin.site_identifier,
            origin_url = %origin.origin_url,
            created,
            "Origin registration processed"
        );
        Ok(RegistrationOutcome { origin, created })
    }

    fn authorized(&self, presented: &str) -> bool {
        match self.api_key.as_deref() {
            Some(expected) => bool::from(expected.as_bytes().ct_eq(presented.as_bytes())),
            None => false,
        }
    }
}
