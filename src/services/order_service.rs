//! Order service: decode/validate inbound messages, write through the store
//! and the cache, serve cache-aside reads and preload the cache at startup.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{cache_key, Order};
use crate::ports::{CacheError, OrderCache, OrderRepository, RepositoryError};
use crate::validation::{validate_order, ValidationErrors};

#[derive(Debug, Error)]
pub enum OrderServiceError {
    #[error("malformed order message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("order {0} not found")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[source] RepositoryError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl OrderServiceError {
    /// Decode and validation failures belong to the message, not the system;
    /// retrying them can never succeed.
    pub fn is_message_local(&self) -> bool {
        matches!(
            self,
            OrderServiceError::Decode(_) | OrderServiceError::Validation(_)
        )
    }
}

pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    cache: Arc<dyn OrderCache>,
    cache_ttl: Duration,
}

impl OrderService {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        cache: Arc<dyn OrderCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            cache,
            cache_ttl,
        }
    }

    pub fn repository(&self) -> &Arc<dyn OrderRepository> {
        &self.repository
    }

    pub fn cache(&self) -> &Arc<dyn OrderCache> {
        &self.cache
    }

    pub fn decode(&self, raw: &[u8]) -> Result<Order, OrderServiceError> {
        Self::decode_order(raw)
    }

    /// Parses a raw stream payload. Usable without a service instance.
    pub fn decode_order(raw: &[u8]) -> Result<Order, OrderServiceError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn validate(&self, order: &Order) -> Result<(), OrderServiceError> {
        Ok(validate_order(order)?)
    }

    /// Idempotent upsert keyed by `order_uid`.
    pub async fn save_order(&self, order: &Order) -> Result<(), OrderServiceError> {
        self.repository
            .upsert(order)
            .await
            .map_err(OrderServiceError::Store)
    }

    pub async fn set_order(&self, order: &Order) -> Result<(), OrderServiceError> {
        self.cache
            .set(&order.cache_key(), order, self.cache_ttl)
            .await?;
        Ok(())
    }

    /// Cache-aside lookup. The cache can only speed a read up: a miss or a
    /// cache failure falls through to the store, and a failed repopulation is
    /// logged without failing the read.
    pub async fn get_order_by_uid(&self, order_uid: &str) -> Result<Order, OrderServiceError> {
        let key = cache_key(order_uid);

        match self.cache.get(&key).await {
            Ok(order) => {
                debug!(key = %key, "Cache hit");
                return Ok(order);
            }
            Err(CacheError::Miss(_)) => debug!(key = %key, "Cache miss"),
            Err(e) => error!(key = %key, error = %e, "Cache read failed, falling back to store"),
        }

        let order = match self.repository.get_by_uid(order_uid).await {
            Ok(order) => order,
            Err(RepositoryError::NotFound(_)) => {
                warn!(order_uid = %order_uid, "Order not found");
                return Err(OrderServiceError::NotFound(order_uid.to_string()));
            }
            Err(e) => {
                error!(order_uid = %order_uid, error = %e, "Store read failed");
                return Err(OrderServiceError::Store(e));
            }
        };

        if let Err(e) = self.set_order(&order).await {
            error!(order_uid = %order_uid, error = %e, "Failed to repopulate cache");
        }

        Ok(order)
    }

    /// Copies the `limit` most recent orders into the cache and returns how
    /// many were cached. Only a failed store read fails the call.
    pub async fn preload_recent_orders(&self, limit: i64) -> Result<usize, OrderServiceError> {
        let orders = self.repository.get_recent(limit).await.map_err(|e| {
            error!(error = %e, "Failed to load recent orders");
            OrderServiceError::Store(e)
        })?;

        let mut cached = 0;
        for order in &orders {
            match self.set_order(order).await {
                Ok(()) => {
                    cached += 1;
                    debug!(order_uid = %order.order_uid, "Preloaded order into cache");
                }
                Err(e) => {
                    error!(order_uid = %order.order_uid, error = %e, "Failed to preload order")
                }
            }
        }

        info!(loaded = orders.len(), cached, "Cache preload finished");
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryOrderCache, InMemoryOrderRepository};

    fn service() -> OrderService {
        OrderService::new(
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(InMemoryOrderCache::new()),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn decode_rejects_malformed_payload() {
        let err = service().decode(b"{not json").unwrap_err();
        assert!(matches!(err, OrderServiceError::Decode(_)));
        assert!(err.is_message_local());
    }

    #[test]
    fn validate_wraps_validation_errors() {
        let err = service().validate(&Order::default()).unwrap_err();
        match err {
            OrderServiceError::Validation(errors) => assert!(errors.has_field("order_uid")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn store_and_cache_errors_are_not_message_local() {
        let store = OrderServiceError::Store(RepositoryError::Unavailable("down".to_string()));
        let cache = OrderServiceError::Cache(CacheError::Unavailable("down".to_string()));
        assert!(!store.is_message_local());
        assert!(!cache.is_message_local());
    }
}
