//! The shared key/value backend consumed by the cache core.
//!
//! Every proxy instance talks to the same backend, so all cross-instance
//! coordination (entry TTLs, the stampede lease, the disk index) goes through
//! these primitives. No operation spans more than one key.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend command `{command}` failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
}

impl BackendError {
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a live value. Absent and expired keys are `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    /// Store a value that expires after `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError>;

    /// Atomically store a value only when the key is not currently held.
    ///
    /// Keys written here are only read back through [`Self::delete_if_equals`].
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, BackendError>;

    /// Delete the key only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, BackendError>;

    /// Add or re-score a member of a sorted set.
    async fn sorted_add(&self, set: &str, member: &str, score: i64) -> Result<(), BackendError>;

    /// Members with `score <= max_score`, lowest score first.
    async fn sorted_range_up_to(
        &self,
        set: &str,
        max_score: i64,
    ) -> Result<Vec<String>, BackendError>;

    async fn sorted_score(&self, set: &str, member: &str) -> Result<Option<i64>, BackendError>;

    /// Atomically remove a member only while its score is still `<= max_score`.
    /// A member re-scored by a concurrent writer stays.
    async fn sorted_remove_if_score_at_most(
        &self,
        set: &str,
        member: &str,
        max_score: i64,
    ) -> Result<bool, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}
