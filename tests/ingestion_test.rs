mod common;

use async_trait::async_trait;
use common::{sample_order, service, to_json, FlakyCache, FlakyRepository, TTL};
use order_service::adapters::{in_memory_stream, InMemoryOrderRepository};
use order_service::domain::Order;
use order_service::lifecycle::phase::Phase;
use order_service::ports::{ConsumerError, MessageConsumer, OrderRepository, RepositoryResult};
use order_service::services::{IngestionLoop, MessageOutcome, OrderService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Repository whose upsert parks until the test releases it.
#[derive(Default)]
struct GatedRepository {
    inner: InMemoryOrderRepository,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl OrderRepository for GatedRepository {
    async fn upsert(&self, order: &Order) -> RepositoryResult<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.upsert(order).await
    }

    async fn get_by_uid(&self, order_uid: &str) -> RepositoryResult<Order> {
        self.inner.get_by_uid(order_uid).await
    }

    async fn get_recent(&self, limit: i64) -> RepositoryResult<Vec<Order>> {
        self.inner.get_recent(limit).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[tokio::test]
async fn test_malformed_then_valid_message_persists_one_order() {
    let repository = FlakyRepository::default();
    let cache = FlakyCache::new();
    let (stream, consumer) = in_memory_stream();
    let consumer = Arc::new(consumer);

    stream.send("{\"order_uid\": ");
    stream.send(to_json(&sample_order("abc123", 1)));

    let ingestion = IngestionLoop::new(service(&repository, &cache), consumer.clone());
    let handle = tokio::spawn(ingestion.run(CancellationToken::new()));

    // Closing after both messages are queued lets the loop drain them first.
    while repository.inner.is_empty() {
        tokio::task::yield_now().await;
    }
    consumer.close().await.unwrap();

    let stats = handle.await.unwrap();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.persisted, 1);
    assert_eq!(repository.inner.len(), 1);
    assert!(cache.inner.contains_key("order:abc123"));
}

#[tokio::test]
async fn test_invalid_order_is_rejected_without_store_write() {
    let repository = FlakyRepository::default();
    let (_stream, consumer) = in_memory_stream();
    let ingestion = IngestionLoop::new(service(&repository, &FlakyCache::new()), Arc::new(consumer));

    let mut order = sample_order("bad", 1);
    order.items.clear();

    assert_eq!(ingestion.process_message(&to_json(&order)).await, MessageOutcome::Rejected);
    assert_eq!(repository.upsert_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_store_failure_drops_message_without_retry() {
    let repository = FlakyRepository::default();
    repository.fail_upserts(true);
    let cache = FlakyCache::new();
    let (_stream, consumer) = in_memory_stream();
    let ingestion = IngestionLoop::new(service(&repository, &cache), Arc::new(consumer));

    let outcome = ingestion
        .process_message(&to_json(&sample_order("u1", 1)))
        .await;

    assert_eq!(outcome, MessageOutcome::StoreFailed { order_uid: "u1".to_string() });
    assert_eq!(repository.upsert_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(cache.set_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cache_failure_after_save_counts_as_persisted() {
    let repository = FlakyRepository::default();
    let cache = FlakyCache::new();
    cache.fail_set_for("order:u1");
    let (_stream, consumer) = in_memory_stream();
    let ingestion = IngestionLoop::new(service(&repository, &cache), Arc::new(consumer));

    let outcome = ingestion
        .process_message(&to_json(&sample_order("u1", 1)))
        .await;

    assert_eq!(outcome, MessageOutcome::StoredNotCached { order_uid: "u1".to_string() });
    assert_eq!(repository.inner.len(), 1);
}

#[tokio::test]
async fn test_cancellation_stops_idle_loop() {
    let (_stream, consumer) = in_memory_stream();
    let ingestion = IngestionLoop::new(
        service(&FlakyRepository::default(), &FlakyCache::new()),
        Arc::new(consumer),
    );
    let phase = ingestion.phase();
    let token = CancellationToken::new();

    let handle = tokio::spawn(ingestion.run(token.clone()));
    tokio::task::yield_now().await;
    token.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop after cancellation")
        .unwrap();
    assert_eq!(stats.persisted, 0);
    assert_eq!(phase.get(), Phase::Stopped);
}

#[tokio::test]
async fn test_timeouts_are_retried_immediately() {
    let repository = FlakyRepository::default();
    let (stream, consumer) = in_memory_stream();
    let consumer = Arc::new(consumer);
    stream.send_error(ConsumerError::Timeout);
    stream.send_error(ConsumerError::Timeout);
    stream.send(to_json(&sample_order("u1", 1)));

    let ingestion = IngestionLoop::new(service(&repository, &FlakyCache::new()), consumer.clone());
    let handle = tokio::spawn(ingestion.run(CancellationToken::new()));

    while repository.inner.is_empty() {
        tokio::task::yield_now().await;
    }
    consumer.close().await.unwrap();

    let stats = handle.await.unwrap();
    assert_eq!(stats.read_errors, 0);
    assert_eq!(stats.persisted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_read_error_backs_off_before_retrying() {
    let repository = FlakyRepository::default();
    let (stream, consumer) = in_memory_stream();
    let consumer = Arc::new(consumer);
    stream.send_error(ConsumerError::Backend("connection reset".to_string()));
    stream.send(to_json(&sample_order("u1", 1)));

    let ingestion = IngestionLoop::new(service(&repository, &FlakyCache::new()), consumer.clone())
        .with_read_error_backoff(Duration::from_secs(2));
    let handle = tokio::spawn(ingestion.run(CancellationToken::new()));

    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert!(repository.inner.is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(repository.inner.len(), 1);

    consumer.close().await.unwrap();
    let stats = handle.await.unwrap();
    assert_eq!(stats.read_errors, 1);
    assert_eq!(stats.persisted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_backoff() {
    let (stream, consumer) = in_memory_stream();
    stream.send_error(ConsumerError::Backend("connection reset".to_string()));

    let ingestion = IngestionLoop::new(
        service(&FlakyRepository::default(), &FlakyCache::new()),
        Arc::new(consumer),
    )
    .with_read_error_backoff(Duration::from_secs(60));
    let token = CancellationToken::new();
    let handle = tokio::spawn(ingestion.run(token.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    token.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("backoff ignored cancellation")
        .unwrap();
    assert_eq!(stats.read_errors, 1);
}

#[tokio::test]
async fn test_cancellation_during_upsert_finishes_message() {
    let repository = Arc::new(GatedRepository::default());
    let cache = FlakyCache::new();
    let orders = Arc::new(OrderService::new(
        repository.clone(),
        Arc::new(cache.clone()),
        TTL,
    ));
    let (stream, consumer) = in_memory_stream();
    stream.send(to_json(&sample_order("abc123", 1)));

    let ingestion = IngestionLoop::new(orders, Arc::new(consumer));
    let phase = ingestion.phase();
    let token = CancellationToken::new();
    let handle = tokio::spawn(ingestion.run(token.clone()));

    repository.entered.notified().await;
    token.cancel();
    tokio::task::yield_now().await;
    repository.release.notify_one();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop after cancellation")
        .unwrap();
    assert_eq!(stats.persisted, 1);
    assert!(repository.inner.get_by_uid("abc123").await.is_ok());
    assert!(cache.inner.contains_key("order:abc123"));
    assert_eq!(phase.get(), Phase::Stopped);
}
