//! Redis implementation of OrderCache.
//! Orders are stored as JSON strings with a millisecond expiry.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use crate::domain::Order;
use crate::ports::{CacheError, CacheResult, OrderCache};

/// Longest expiry sent with `PX`: 100 years. Redis rejects expiries that
/// overflow its clock.
const MAX_PX_MILLIS: u64 = 100 * 365 * 86400 * 1000;

/// `PX` argument for `ttl`. PX rejects zero, so a zero TTL still gets the
/// shortest expiry.
fn px_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_PX_MILLIS)
}

#[derive(Clone)]
pub struct RedisOrderCache {
    conn: MultiplexedConnection,
}

impl RedisOrderCache {
    /// Opens a multiplexed connection and verifies it with `PING`.
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!("Connected to Redis cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl OrderCache for RedisOrderCache {
    async fn set(&self, key: &str, order: &Order, ttl: Duration) -> CacheResult<()> {
        let ttl_ms = px_millis(ttl);
        tracing::debug!(key, ttl_ms, "Caching order");
        let value = serde_json::to_string(order)?;
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Order> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(CacheError::Miss(key.to_string())),
        }
    }

    async fn close(&self) {
        // The multiplexed connection shuts down once the last clone is dropped.
        tracing::info!("Closing Redis cache");
    }
}
