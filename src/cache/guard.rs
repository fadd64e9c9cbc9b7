//! Per-key stampede lease.
//!
//! The lease is a `lock:{key}` record created with set-if-absent on the shared
//! backend, so it excludes populators across processes as well as tasks. It
//! carries a random token and is released with compare-and-delete, so a holder
//! that outlived its TTL never removes a successor's lease.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::{BackendError, CacheBackend};
use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A held lease. Hand it back through [`StampedeGuard::release`].
#[derive(Debug)]
#[must_use = "a lease should be released once the entry is populated"]
pub struct Lease {
    lock_key: String,
    token: String,
}

impl Lease {
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }
}

#[derive(Clone)]
pub struct StampedeGuard {
    backend: Arc<dyn CacheBackend>,
    lease_ttl: Duration,
}

impl StampedeGuard {
    pub fn new(backend: Arc<dyn CacheBackend>, lease_ttl: Duration) -> Self {
        Self { backend, lease_ttl }
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Try to take the lease for `key` without waiting.
    pub async fn try_acquire(&self, key: &CacheKey) -> Result<Option<Lease>, GuardError> {
        let lock_key = key.lock_key();
        let token = Uuid::new_v4().simple().to_string();
        let acquired = self
            .backend
            .set_nx(&lock_key, token.as_bytes(), self.lease_ttl)
            .await?;
        if acquired {
            debug!(lock_key, "Acquired stampede lease");
            Ok(Some(Lease { lock_key, token }))
        } else {
            Ok(None)
        }
    }

    /// Release a lease. Returns `false` when it had already expired or been
    /// taken over. Errors are logged; the lease then lapses on its TTL.
    pub async fn release(&self, lease: Lease) -> bool {
        match self
            .backend
            .delete_if_equals(&lease.lock_key, lease.token.as_bytes())
            .await
        {
            Ok(released) => {
                if !released {
                    debug!(lock_key = lease.lock_key, "Stampede lease expired before release");
                }
                released
            }
            Err(err) => {
                warn!(lock_key = lease.lock_key, error = %err, "Failed to release stampede lease");
                false
            }
        }
    }
}
