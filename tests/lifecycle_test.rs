mod common;

use common::{sample_order, to_json, FlakyCache, FlakyRepository, TTL};
use order_service::adapters::{in_memory_stream, InMemoryConsumer, InMemoryOrderRepository, InMemoryStream};
use order_service::health::HealthCheck;
use order_service::lifecycle::phase::Phase;
use order_service::lifecycle::{Application, LifecycleSettings, ShutdownReport};
use order_service::services::OrderService;
use order_service::{create_app, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct Harness {
    app: Arc<Application>,
    stream: InMemoryStream,
    consumer: Arc<InMemoryConsumer>,
    repository: FlakyRepository,
    cache: FlakyCache,
    base_url: String,
}

async fn start(repository: FlakyRepository) -> Harness {
    let cache = FlakyCache::new();
    let orders = Arc::new(OrderService::new(
        Arc::new(repository.clone()),
        Arc::new(cache.clone()),
        TTL,
    ));
    let router = create_app(AppState {
        orders: orders.clone(),
        health: Arc::new(HealthCheck::new()),
    });
    let (stream, consumer) = in_memory_stream();
    let consumer = Arc::new(consumer);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let app = Application::new(
        orders,
        consumer.clone(),
        router,
        listener,
        LifecycleSettings {
            preload_limit: 10,
            shutdown_timeout: Duration::from_secs(5),
            read_error_backoff: Duration::from_millis(50),
        },
    )
    .unwrap();
    let base_url = format!("http://{}", app.local_addr());

    Harness {
        app: Arc::new(app),
        stream,
        consumer,
        repository,
        cache,
        base_url,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_full_pipeline_then_graceful_shutdown() {
    let h = start(FlakyRepository::default()).await;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let running = {
        let app = h.app.clone();
        tokio::spawn(async move {
            app.run(async {
                let _ = stop_rx.await;
            })
            .await
        })
    };

    h.stream.send(to_json(&sample_order("abc123", 1)));
    wait_for(|| h.cache.inner.contains_key("order:abc123")).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/order/abc123", h.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["order_uid"], "abc123");

    let missing = client
        .get(format!("{}/order/missing", h.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    drop(client);
    stop_tx.send(()).unwrap();
    let report = running.await.unwrap().unwrap();

    assert!(report.is_clean(), "issues: {:?}", report.issues);
    assert_eq!(report.ingestion.map(|s| s.persisted), Some(1));
    assert_eq!(h.app.phase(), Phase::Stopped);
    assert_eq!(h.consumer.close_calls(), 1);
    assert!(h.repository.inner.is_closed());
    assert!(h.cache.inner.is_closed());

    // The listener is gone once shutdown completes.
    let after = reqwest::Client::new()
        .get(format!("{}/order/abc123", h.base_url))
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    assert!(after.is_err());
}

#[tokio::test]
async fn test_concurrent_shutdown_runs_once() {
    let h = start(FlakyRepository::default()).await;

    let running = {
        let app = h.app.clone();
        tokio::spawn(async move { app.run(std::future::pending()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let app = h.app.clone();
            tokio::spawn(async move { app.shutdown().await })
        })
        .collect();

    let mut reports: Vec<ShutdownReport> = Vec::new();
    for caller in callers {
        reports.push(caller.await.unwrap());
    }
    let run_report = running.await.unwrap().unwrap();

    assert_eq!(h.consumer.close_calls(), 1);
    for report in &reports {
        assert_eq!(report.ingestion, run_report.ingestion);
        assert_eq!(report.issues, run_report.issues);
    }
    assert_eq!(h.app.phase(), Phase::Stopped);
}

#[tokio::test]
async fn test_startup_preloads_recent_orders() {
    let stored = (0..3).map(|i| sample_order(&format!("u{}", i), i + 1));
    let h = start(FlakyRepository::new(InMemoryOrderRepository::with_orders(stored))).await;

    let running = {
        let app = h.app.clone();
        tokio::spawn(async move { app.run(std::future::pending()).await })
    };

    wait_for(|| h.cache.inner.keys().len() == 3).await;

    h.app.shutdown().await;
    running.await.unwrap().unwrap();
}
