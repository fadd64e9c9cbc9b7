//! Redis implementation of [`CacheBackend`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{Client, RedisError, Script, aio::ConnectionManager, cmd};
use tracing::info;
use url::Url;

use crate::cache::{BackendError, CacheBackend};
use crate::config::RedisSettings;

use super::error::InfraError;

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

const REMOVE_IF_SCORE_AT_MOST: &str = r#"
local score = redis.call("ZSCORE", KEYS[1], ARGV[1])
if score and tonumber(score) <= tonumber(ARGV[2]) then
    return redis.call("ZREM", KEYS[1], ARGV[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
    compare_and_delete: Script,
    remove_if_score_at_most: Script,
}

impl RedisBackend {
    pub async fn connect(settings: &RedisSettings) -> Result<Self, InfraError> {
        let url = connection_url(settings)?;
        let client = Client::open(url.as_str())
            .map_err(|err| InfraError::cache_backend(format!("invalid redis address: {err}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| InfraError::cache_backend(format!("failed to connect to redis: {err}")))?;
        info!(
            host = %settings.host,
            port = settings.port,
            "Connected to redis cache backend"
        );
        Ok(Self {
            manager,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            remove_if_score_at_most: Script::new(REMOVE_IF_SCORE_AT_MOST),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn connection_url(settings: &RedisSettings) -> Result<Url, InfraError> {
    let mut url = Url::parse(&format!("redis://{}:{}/", settings.host, settings.port))
        .map_err(|err| InfraError::configuration(format!("invalid redis address: {err}")))?;
    if let Some(password) = settings.password.as_deref() {
        url.set_password(Some(password))
            .map_err(|()| InfraError::configuration("redis password cannot be encoded"))?;
    }
    Ok(url)
}

fn map_error(command: &'static str) -> impl Fn(RedisError) -> BackendError {
    move |err| {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            BackendError::Unavailable(err.to_string())
        } else {
            BackendError::command(command, err.to_string())
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let value: Option<Vec<u8>> = cmd("GET")
            .arg(key)
            .query_async(&mut self.connection())
            .await
            .map_err(map_error("GET"))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        let _: () = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut self.connection())
            .await
            .map_err(map_error("SET"))?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, BackendError> {
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut self.connection())
            .await
            .map_err(map_error("SET NX"))?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, BackendError> {
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.connection())
            .await
            .map_err(map_error("EVALSHA"))?;
        Ok(deleted > 0)
    }

    async fn sorted_add(&self, set: &str, member: &str, score: i64) -> Result<(), BackendError> {
        let _: i64 = cmd("ZADD")
            .arg(set)
            .arg(score)
            .arg(member)
            .query_async(&mut self.connection())
            .await
            .map_err(map_error("ZADD"))?;
        Ok(())
    }

    async fn sorted_range_up_to(
        &self,
        set: &str,
        max_score: i64,
    ) -> Result<Vec<String>, BackendError> {
        let members: Vec<String> = cmd("ZRANGEBYSCORE")
            .arg(set)
            .arg("-inf")
            .arg(max_score)
            .query_async(&mut self.connection())
            .await
            .map_err(map_error("ZRANGEBYSCORE"))?;
        Ok(members)
    }

    async fn sorted_score(&self, set: &str, member: &str) -> Result<Option<i64>, BackendError> {
        let score: Option<f64> = cmd("ZSCORE")
            .arg(set)
            .arg(member)
            .query_async(&mut self.connection())
            .await
            .map_err(map_error("ZSCORE"))?;
        Ok(score.map(|score| score as i64))
    }

    async fn sorted_remove_if_score_at_most(
        &self,
        set: &str,
        member: &str,
        max_score: i64,
    ) -> Result<bool, BackendError> {
        let removed: i64 = self
            .remove_if_score_at_most
            .key(set)
            .arg(member)
            .arg(max_score)
            .invoke_async(&mut self.connection())
            .await
            .map_err(map_error("EVALSHA"))?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let _: String = cmd("PING")
            .query_async(&mut self.connection())
            .await
            .map_err(map_error("PING"))?;
        Ok(())
    }
}
