//! Capability traits the pipeline depends on.
//! Each port has a production adapter and an in-memory substitute in
//! [`crate::adapters`].

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::Order;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("order {0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Durable, authoritative order storage keyed by `order_uid`.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts the order or replaces the stored aggregate wholesale.
    async fn upsert(&self, order: &Order) -> RepositoryResult<()>;

    /// Returns [`RepositoryError::NotFound`] when the order is absent.
    async fn get_by_uid(&self, order_uid: &str) -> RepositoryResult<Order>;

    /// Up to `limit` orders, newest `date_created` first.
    async fn get_recent(&self, limit: i64) -> RepositoryResult<Vec<Order>>;

    async fn close(&self);
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache miss for key {0}")]
    Miss(String),

    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss(_))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Volatile, expiring copy of orders. Every caller must tolerate failures.
#[async_trait]
pub trait OrderCache: Send + Sync {
    async fn set(&self, key: &str, order: &Order, ttl: Duration) -> CacheResult<()>;

    /// Returns [`CacheError::Miss`] when the key is absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Order>;

    async fn close(&self);
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// No message arrived within one poll cycle.
    #[error("no message within the poll timeout")]
    Timeout,

    /// The underlying connection was closed; no further reads will succeed.
    #[error("consumer is closed")]
    Closed,

    #[error("stream backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for ConsumerError {
    fn from(e: redis::RedisError) -> Self {
        ConsumerError::Backend(e.to_string())
    }
}

pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Ordered source of opaque order messages.
///
/// `read_message` must be cancel-safe with respect to dropping its future:
/// the ingestion loop races it against shutdown. A message whose read was
/// dropped, or that was handed out but not yet followed by another read, must
/// be delivered again rather than lost.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    async fn read_message(&self) -> ConsumerResult<Vec<u8>>;

    async fn close(&self) -> ConsumerResult<()>;
}
