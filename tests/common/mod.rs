#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use order_service::adapters::{InMemoryOrderCache, InMemoryOrderRepository};
use order_service::domain::{Delivery, Item, Order, Payment};
use order_service::ports::{
    CacheError, CacheResult, OrderCache, OrderRepository, RepositoryError, RepositoryResult,
};
use order_service::services::OrderService;

pub const TTL: Duration = Duration::from_secs(60);

/// A complete order created `hours_ago` hours before now.
pub fn sample_order(uid: &str, hours_ago: i64) -> Order {
    Order {
        order_uid: uid.to_string(),
        track_number: "T1".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "A".to_string(),
            phone: "+79990000000".to_string(),
            address: "X".to_string(),
            city: "Y".to_string(),
            ..Default::default()
        },
        payment: Payment {
            transaction: uid.to_string(),
            currency: "USD".to_string(),
            provider: "p".to_string(),
            amount: 100,
            ..Default::default()
        },
        items: vec![Item {
            chrt_id: 1,
            price: 10,
            total_price: 10,
            name: "n".to_string(),
            brand: "b".to_string(),
            rid: "r".to_string(),
            track_number: "T1".to_string(),
            nm_id: 1,
            status: 200,
            ..Default::default()
        }],
        date_created: Some(Utc::now() - ChronoDuration::hours(hours_ago)),
        sm_id: 1,
        ..Default::default()
    }
}

pub fn to_json(order: &Order) -> Vec<u8> {
    serde_json::to_vec(order).unwrap()
}

/// Cache wrapper that fails on demand.
#[derive(Clone, Default)]
pub struct FlakyCache {
    pub inner: InMemoryOrderCache,
    fail_get: Arc<AtomicBool>,
    fail_set_keys: Arc<Mutex<HashSet<String>>>,
    pub set_calls: Arc<AtomicUsize>,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_gets(&self) {
        self.fail_get.store(true, Ordering::SeqCst);
    }

    pub fn fail_set_for(&self, key: &str) {
        self.fail_set_keys.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl OrderCache for FlakyCache {
    async fn set(&self, key: &str, order: &Order, ttl: Duration) -> CacheResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set_keys.lock().unwrap().contains(key) {
            return Err(CacheError::Unavailable("injected set failure".to_string()));
        }
        self.inner.set(key, order, ttl).await
    }

    async fn get(&self, key: &str) -> CacheResult<Order> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected get failure".to_string()));
        }
        self.inner.get(key).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

/// Repository wrapper that fails on demand.
#[derive(Clone, Default)]
pub struct FlakyRepository {
    pub inner: InMemoryOrderRepository,
    fail_upsert: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    pub upsert_calls: Arc<AtomicUsize>,
}

impl FlakyRepository {
    pub fn new(inner: InMemoryOrderRepository) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderRepository for FlakyRepository {
    async fn upsert(&self, order: &Order) -> RepositoryResult<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("injected write failure".to_string()));
        }
        self.inner.upsert(order).await
    }

    async fn get_by_uid(&self, order_uid: &str) -> RepositoryResult<Order> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("injected read failure".to_string()));
        }
        self.inner.get_by_uid(order_uid).await
    }

    async fn get_recent(&self, limit: i64) -> RepositoryResult<Vec<Order>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("injected read failure".to_string()));
        }
        self.inner.get_recent(limit).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

pub fn service(repository: &FlakyRepository, cache: &FlakyCache) -> Arc<OrderService> {
    Arc::new(OrderService::new(
        Arc::new(repository.clone()),
        Arc::new(cache.clone()),
        TTL,
    ))
}
