//! In-memory implementations of the ports for testing and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::Order;

/// Expiry used when `now + ttl` does not fit in an `Instant`.
const NEVER_EXPIRES: Duration = Duration::from_secs(86400 * 365 * 30);
use crate::ports::{
    CacheError, CacheResult, ConsumerError, ConsumerResult, MessageConsumer, OrderCache,
    OrderRepository, RepositoryError, RepositoryResult,
};

/// In-memory order repository.
///
/// Upserts replace the stored aggregate wholesale, like the Postgres adapter.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let repo = Self::new();
        if let Ok(mut map) = repo.orders.write() {
            for order in orders {
                map.insert(order.order_uid.clone(), order);
            }
        }
        repo
    }

    pub fn len(&self) -> usize {
        self.orders.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored orders sorted by identifier.
    pub fn snapshot(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        orders.sort_by(|a, b| a.order_uid.cmp(&b.order_uid));
        orders
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> RepositoryResult<()> {
        if self.is_closed() {
            return Err(RepositoryError::Unavailable("repository is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn upsert(&self, order: &Order) -> RepositoryResult<()> {
        self.ensure_open()?;
        let mut orders = self
            .orders
            .write()
            .map_err(|e| RepositoryError::Unavailable(format!("lock poisoned: {}", e)))?;
        orders.insert(order.order_uid.clone(), order.clone());
        Ok(())
    }

    async fn get_by_uid(&self, order_uid: &str) -> RepositoryResult<Order> {
        self.ensure_open()?;
        let orders = self
            .orders
            .read()
            .map_err(|e| RepositoryError::Unavailable(format!("lock poisoned: {}", e)))?;
        orders
            .get(order_uid)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(order_uid.to_string()))
    }

    async fn get_recent(&self, limit: i64) -> RepositoryResult<Vec<Order>> {
        self.ensure_open()?;
        let orders = self
            .orders
            .read()
            .map_err(|e| RepositoryError::Unavailable(format!("lock poisoned: {}", e)))?;

        let mut recent: Vec<Order> = orders.values().cloned().collect();
        recent.sort_by(|a, b| b.date_created.cmp(&a.date_created));
        recent.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(recent)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// In-memory cache with per-key expiry, measured on the tokio clock.
#[derive(Clone, Default)]
pub struct InMemoryOrderCache {
    entries: Arc<RwLock<HashMap<String, (Order, Instant)>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryOrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` holds an entry that has not expired yet.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .map(|m| m.get(key).is_some_and(|(_, expires)| *expires > now))
            .unwrap_or(false)
    }

    /// Keys of live entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .map(|m| {
                m.iter()
                    .filter(|(_, (_, expires))| *expires > now)
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderCache for InMemoryOrderCache {
    async fn set(&self, key: &str, order: &Order, ttl: Duration) -> CacheResult<()> {
        if self.is_closed() {
            return Err(CacheError::Unavailable("cache is closed".to_string()));
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Unavailable(format!("lock poisoned: {}", e)))?;
        let now = Instant::now();
        let expires = now.checked_add(ttl).unwrap_or_else(|| now + NEVER_EXPIRES);
        entries.insert(key.to_string(), (order.clone(), expires));
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Order> {
        if self.is_closed() {
            return Err(CacheError::Unavailable("cache is closed".to_string()));
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Unavailable(format!("lock poisoned: {}", e)))?;

        match entries.get(key) {
            Some((order, expires)) if *expires > Instant::now() => Ok(order.clone()),
            Some(_) => {
                entries.remove(key);
                Err(CacheError::Miss(key.to_string()))
            }
            None => Err(CacheError::Miss(key.to_string())),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Producer half of an in-memory stream.
#[derive(Clone)]
pub struct InMemoryStream {
    tx: mpsc::UnboundedSender<ConsumerResult<Vec<u8>>>,
}

impl InMemoryStream {
    /// Queues a message. Returns false once the consumer is gone.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.tx.send(Ok(payload.into())).is_ok()
    }

    /// Queues a read error to be returned in order with the messages.
    pub fn send_error(&self, error: ConsumerError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

/// Consumer half of an in-memory stream; delivers in send order.
pub struct InMemoryConsumer {
    rx: Mutex<mpsc::UnboundedReceiver<ConsumerResult<Vec<u8>>>>,
    closed: CancellationToken,
    close_calls: AtomicUsize,
}

impl InMemoryConsumer {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

pub fn in_memory_stream() -> (InMemoryStream, InMemoryConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        InMemoryStream { tx },
        InMemoryConsumer {
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
            close_calls: AtomicUsize::new(0),
        },
    )
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn read_message(&self) -> ConsumerResult<Vec<u8>> {
        if self.closed.is_cancelled() {
            return Err(ConsumerError::Closed);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(ConsumerError::Closed),
            next = rx.recv() => next.unwrap_or(Err(ConsumerError::Closed)),
        }
    }

    async fn close(&self) -> ConsumerResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn order(uid: &str, hour: u32) -> Order {
        Order {
            order_uid: uid.to_string(),
            date_created: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).single(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_replaces_whole_order() {
        let repo = InMemoryOrderRepository::new();
        let mut first = order("a", 1);
        first.items = vec![Default::default(), Default::default()];
        repo.upsert(&first).await.unwrap();

        let second = order("a", 2);
        repo.upsert(&second).await.unwrap();

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get_by_uid("a").await.unwrap(), second);
    }

    #[tokio::test]
    async fn get_recent_orders_newest_first() {
        let repo =
            InMemoryOrderRepository::with_orders(vec![order("a", 1), order("b", 3), order("c", 2)]);

        let recent = repo.get_recent(2).await.unwrap();
        let uids: Vec<&str> = recent.iter().map(|o| o.order_uid.as_str()).collect();
        assert_eq!(uids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let repo = InMemoryOrderRepository::new();
        let err = repo.get_by_uid("nope").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(uid) if uid == "nope"));
    }

    #[tokio::test]
    async fn closed_repository_rejects_calls() {
        let repo = InMemoryOrderRepository::new();
        repo.close().await;
        assert!(matches!(
            repo.upsert(&order("a", 1)).await,
            Err(RepositoryError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire() {
        let cache = InMemoryOrderCache::new();
        cache
            .set("order:a", &order("a", 1), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(cache.get("order:a").await.is_ok());

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cache.get("order:a").await.unwrap_err().is_miss());
        assert!(!cache.contains_key("order:a"));
    }

    #[tokio::test]
    async fn cache_accepts_unbounded_ttl() {
        let cache = InMemoryOrderCache::new();
        cache
            .set("order:a", &order("a", 1), Duration::MAX)
            .await
            .unwrap();

        assert_eq!(cache.get("order:a").await.unwrap(), order("a", 1));
    }

    #[tokio::test]
    async fn stream_delivers_in_order_then_closes() {
        let (stream, consumer) = in_memory_stream();
        stream.send("one");
        stream.send_error(ConsumerError::Timeout);
        stream.send("two");

        assert_eq!(consumer.read_message().await.unwrap(), b"one".to_vec());
        assert!(matches!(consumer.read_message().await, Err(ConsumerError::Timeout)));
        assert_eq!(consumer.read_message().await.unwrap(), b"two".to_vec());

        consumer.close().await.unwrap();
        assert!(matches!(consumer.read_message().await, Err(ConsumerError::Closed)));
        assert_eq!(consumer.close_calls(), 1);
    }

    #[tokio::test]
    async fn close_wakes_blocked_reader() {
        let (_stream, consumer) = in_memory_stream();
        let consumer = Arc::new(consumer);

        let reader = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.read_message().await })
        };
        tokio::task::yield_now().await;
        consumer.close().await.unwrap();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(ConsumerError::Closed)));
    }
}
