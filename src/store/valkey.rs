//! Redis/Valkey affinity store.

use std::fmt;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use super::{AffinityStore, CasOutcome, StoreError};
use crate::config::StoreConfig;

/// Deletes KEYS[1] only when it holds ARGV[1].
const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
else
    return 0
end
"#;

/// Sets KEYS[1] to ARGV[2] when it holds ARGV[1], or when it is unset and
/// ARGV[1] is the empty unset sentinel. Replies `{1, new}` on success and
/// `{0, current}` on conflict, with `current` nil for a missing key.
const COMPARE_AND_SWAP_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] or (current == false and ARGV[1] == '') then
    redis.call('SET', KEYS[1], ARGV[2])
    return {1, ARGV[2]}
else
    return {0, current}
end
"#;

/// Affinity store shared across activator instances through Redis or Valkey.
#[derive(Clone)]
pub struct RedisAffinityStore {
    pool: Pool,
    namespace: Option<String>,
}

impl fmt::Debug for RedisAffinityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisAffinityStore")
            .field("namespace", &self.namespace)
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisAffinityStore {
    /// Open a connection pool and verify the server answers.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = Config::from_url(&config.url)
            .builder()
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(url = %config.url, pool_size = config.pool_size, "Affinity store connected");

        Ok(Self {
            pool,
            namespace: config.namespace.clone(),
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl AffinityStore for RedisAffinityStore {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(self.prefixed_key(key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        value.ok_or(StoreError::NotFound)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(self.prefixed_key(key), value)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let deleted: u64 = redis::Script::new(DELETE_IF_EQUALS_SCRIPT)
            .key(self.prefixed_key(key))
            .arg(expected)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(deleted)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        desired: &str,
    ) -> Result<CasOutcome, StoreError> {
        if desired.is_empty() {
            // Empty values are the unset sentinel and cannot be stored.
            return Err(StoreError::Backend("refusing to store an empty value".into()));
        }

        let mut conn = self.connection().await?;
        let (swapped, current): (i64, Option<String>) = redis::Script::new(COMPARE_AND_SWAP_SCRIPT)
            .key(self.prefixed_key(key))
            .arg(expected.unwrap_or_default())
            .arg(desired)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if swapped == 1 {
            Ok(CasOutcome::Swapped)
        } else {
            Ok(CasOutcome::Conflict { current })
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close();
        tracing::info!("Affinity store closed");
        Ok(())
    }
}
