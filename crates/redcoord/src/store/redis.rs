//! Redis-backed [`BackingStore`] built on a deadpool-redis pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use futures_util::StreamExt;
use redis::{AsyncCommands, Script};
use redcoord_config::RedisConfig;

use super::{BackingStore, MessageStream, StoreFactory, redact_url};
use crate::error::{StoreError, StoreResult};

/// Deletes KEYS[1] only if it still holds ARGV[1].
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// A pooled Redis connection target.
///
/// Commands run on pooled connections. `SUBSCRIBE` cannot share a pooled
/// connection, so every subscription opens its own pub/sub connection from
/// the same URL.
pub struct RedisStore {
    pool: Pool,
    client: redis::Client,
    url: String,
    release_script: Script,
}

impl RedisStore {
    /// Build a store for `url`. The pool connects lazily; call
    /// [`RedisStore::ping`] to verify the target is reachable.
    pub fn connect(url: &str, pool_size: usize, timeout: Duration) -> StoreResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(url);
        let mut pool_config = deadpool_redis::PoolConfig::new(pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::pool(format!("failed to create Redis pool: {e}")))?;

        let client = redis::Client::open(url)
            .map_err(|e| StoreError::connection(format!("failed to create Redis client: {e}")))?;

        tracing::debug!(url = %redact_url(url), pool_size, "Redis store created");

        Ok(Self {
            pool,
            client,
            url: url.to_string(),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    pub fn from_config(config: &RedisConfig) -> StoreResult<Self> {
        Self::connect(&config.url, config.pool_size, config.timeout())
    }

    /// Check connectivity with a round trip.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(StoreError::from)
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    fn identity(&self) -> String {
        self.url.clone()
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        // SET … NX returns "OK" when the key was set, nil otherwise.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.pexpire::<_, bool>(key, ttl.as_millis() as i64).await?)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn sorted_add(&self, key: &str, members: &[(String, i64)]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let items: Vec<(i64, &str)> = members
            .iter()
            .map(|(member, score)| (*score, member.as_str()))
            .collect();
        let mut conn = self.conn().await?;
        let _: i64 = conn.zadd_multiple(key, &items).await?;
        Ok(())
    }

    async fn sorted_range_from(
        &self,
        key: &str,
        min_score: i64,
    ) -> StoreResult<Vec<(String, i64)>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(String, f64)> = conn
            .zrangebyscore_withscores(key, min_score, "+inf")
            .await?;
        Ok(rows
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn sorted_remove_below(&self, key: &str, cutoff: i64) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn
            .zrembyscore(key, "-inf", format!("({cutoff}"))
            .await?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.expire::<_, bool>(key, ttl.as_secs() as i64).await?)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.publish::<_, _, u64>(channel, payload).await?)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        // Separate connection for pub/sub (can't use pooled connections for SUBSCRIBE)
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::connection(format!("failed to get pub/sub connection: {e}")))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| StoreError::subscribe(format!("failed to subscribe: {e}")))?;

        tracing::info!(channel, url = %redact_url(&self.url), "Subscribed to Redis channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse pub/sub payload");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }

    fn close(&self) {
        self.pool.close();
        tracing::info!(url = %redact_url(&self.url), "Redis pool closed");
    }
}

/// Builds [`RedisStore`]s for the [`ConnectionRegistry`](super::ConnectionRegistry).
#[derive(Debug, Clone)]
pub struct RedisStoreFactory {
    pool_size: usize,
    timeout: Duration,
}

impl RedisStoreFactory {
    pub fn new(pool_size: usize, timeout: Duration) -> Self {
        Self { pool_size, timeout }
    }

    pub fn from_config(config: &RedisConfig) -> Self {
        Self::new(config.pool_size, config.timeout())
    }
}

impl StoreFactory for RedisStoreFactory {
    fn build(&self, url: &str) -> StoreResult<Arc<dyn BackingStore>> {
        let store = RedisStore::connect(url, self.pool_size, self.timeout)?;
        Ok(Arc::new(store))
    }
}
