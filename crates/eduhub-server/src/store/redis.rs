//! Redis implementation of [`SharedStore`].
//!
//! | Operation | Redis |
//! |-----------|-------|
//! | `set_if_absent` | `SET key value NX PX ttl` |
//! | `exists` / `get` / `delete` | `EXISTS` / `GET` / `DEL` |
//! | `set` | `SET key value PX ttl` |
//! | `increment` | Lua: `INCR`, `PEXPIRE` on first hit, `PTTL` |
//! | `ttl` | `PTTL` |
//! | `publish` | `PUBLISH` |
//!
//! Each operation is a single round trip, so the atomicity guarantees of
//! the trait hold across every instance sharing the Redis server.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};
use eduhub_auth::storage::{Counter, SharedStore};
use eduhub_auth::{AuthError, AuthResult};
use redis::{AsyncCommands, RedisError, Script};

use crate::config::RedisConfig;

// KEYS[1] counter, ARGV[1] window in ms. Returns {count, pttl}.
static INCREMENT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
",
    )
});

/// Shared store on a deadpool Redis pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the pool and checks that Redis answers `PING`.
    pub async fn connect(config: &RedisConfig) -> anyhow::Result<Self> {
        let timeout = Some(Duration::from_millis(config.timeout_ms));
        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = timeout;
        pool_config.timeouts.create = timeout;
        pool_config.timeouts.recycle = timeout;
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .context("failed to create Redis pool")?;

        let store = Self::new(pool);
        store
            .ping()
            .await
            .with_context(|| format!("Redis at {} is unreachable", config.url))?;
        Ok(store)
    }

    async fn conn(&self) -> AuthResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| AuthError::storage(format!("failed to get Redis connection: {e}")))
    }
}

fn redis_err(operation: &'static str) -> impl FnOnce(RedisError) -> AuthError {
    move |e| AuthError::storage(format!("redis {operation} failed: {e}"))
}

// Redis rejects a zero expiry.
fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_err("SET NX"))?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> AuthResult<bool> {
        let mut conn = self.conn().await?;
        let found: bool = conn.exists(key).await.map_err(redis_err("EXISTS"))?;
        Ok(found)
    }

    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await.map_err(redis_err("GET"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .pset_ex(key, value, millis(ttl))
            .await
            .map_err(redis_err("SET PX"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await.map_err(redis_err("DEL"))?;
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> AuthResult<Counter> {
        let mut conn = self.conn().await?;
        let (count, pttl): (u64, i64) = INCREMENT_SCRIPT
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err("INCR"))?;
        Ok(Counter {
            count,
            resets_in: Duration::from_millis(pttl.max(0).unsigned_abs()),
        })
    }

    async fn ttl(&self, key: &str) -> AuthResult<Option<Duration>> {
        let mut conn = self.conn().await?;
        let pttl: i64 = conn.pttl(key).await.map_err(redis_err("PTTL"))?;
        // -2: missing. -1: no expiry, which this store never writes.
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl.unsigned_abs())))
    }

    async fn publish(&self, channel: &str, message: &str) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .publish(channel, message)
            .await
            .map_err(redis_err("PUBLISH"))?;
        tracing::debug!(channel, "published invalidation");
        Ok(())
    }

    async fn ping(&self) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_err("PING"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }
}
