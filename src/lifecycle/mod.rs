//! Process lifecycle: starts preload, ingestion and the HTTP server, then
//! tears them down in a fixed order exactly once.

pub mod phase;

use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, OnceCell};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::ports::MessageConsumer;
use crate::services::ingestion::DEFAULT_READ_ERROR_BACKOFF;
use crate::services::{IngestionLoop, IngestionStats, OrderService};
use phase::{Phase, PhaseCell};

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub preload_limit: i64,
    pub shutdown_timeout: Duration,
    pub read_error_backoff: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            preload_limit: 100,
            shutdown_timeout: Duration::from_secs(15),
            read_error_backoff: DEFAULT_READ_ERROR_BACKOFF,
        }
    }
}

impl From<&Config> for LifecycleSettings {
    fn from(config: &Config) -> Self {
        Self {
            preload_limit: config.preload_limit,
            shutdown_timeout: config.shutdown_timeout,
            read_error_backoff: config.read_error_backoff,
        }
    }
}

/// Problem observed while shutting down. None of these block exit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownIssue {
    #[error("HTTP server error: {0}")]
    Server(String),

    #[error("HTTP server did not stop before the deadline")]
    ServerTimeout,

    #[error("consumer close failed: {0}")]
    ConsumerClose(String),

    #[error("task {0} did not finish before the deadline")]
    TaskTimeout(String),

    #[error("task {task} panicked: {message}")]
    TaskPanicked { task: String, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Final counters of the ingestion loop, if it was joined.
    pub ingestion: Option<IngestionStats>,
    pub issues: Vec<ShutdownIssue>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("application was already started")]
    AlreadyStarted,

    #[error("HTTP server failed: {message}")]
    Server {
        message: String,
        report: ShutdownReport,
    },
}

#[derive(Default)]
struct Tasks {
    preload: Option<JoinHandle<()>>,
    ingestion: Option<JoinHandle<IngestionStats>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
}

/// Owns every long-lived task of the service.
pub struct Application {
    service: Arc<OrderService>,
    consumer: Arc<dyn MessageConsumer>,
    settings: LifecycleSettings,
    http: std::sync::Mutex<Option<(Router, TcpListener)>>,
    local_addr: SocketAddr,
    phase: PhaseCell,
    root: CancellationToken,
    ingestion_token: CancellationToken,
    server_token: CancellationToken,
    tasks: Mutex<Tasks>,
    report: OnceCell<ShutdownReport>,
}

impl Application {
    pub fn new(
        service: Arc<OrderService>,
        consumer: Arc<dyn MessageConsumer>,
        router: Router,
        listener: TcpListener,
        settings: LifecycleSettings,
    ) -> std::io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let root = CancellationToken::new();
        let ingestion_token = root.child_token();

        Ok(Self {
            service,
            consumer,
            settings,
            http: std::sync::Mutex::new(Some((router, listener))),
            local_addr,
            phase: PhaseCell::new(),
            root,
            ingestion_token,
            server_token: CancellationToken::new(),
            tasks: Mutex::new(Tasks::default()),
            report: OnceCell::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Starts all tasks and waits for `shutdown_signal`, a server failure or
    /// an explicit [`Application::shutdown`]. Then runs the shutdown sequence.
    pub async fn run<F>(&self, shutdown_signal: F) -> Result<ShutdownReport, LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        let (router, listener) = self
            .http
            .lock()
            .ok()
            .and_then(|mut http| http.take())
            .ok_or(LifecycleError::AlreadyStarted)?;

        let (server_failed_tx, server_failed_rx) = oneshot::channel::<String>();

        {
            let mut tasks = self.tasks.lock().await;
            if self.phase.get() != Phase::Running {
                drop(tasks);
                info!("Shutdown already requested, not starting");
                return Ok(self.shutdown().await);
            }

            tasks.preload = Some(self.spawn_preload());
            tasks.ingestion = Some(self.spawn_ingestion());
            tasks.server = Some(self.spawn_server(router, listener, server_failed_tx));
        }
        info!(addr = %self.local_addr, "Order service started");

        let server_failure = tokio::select! {
            _ = shutdown_signal => {
                info!("Shutdown signal received");
                None
            }
            Ok(message) = server_failed_rx => {
                error!(error = %message, "HTTP server failed, shutting down");
                Some(message)
            }
            _ = self.root.cancelled() => {
                info!("Shutdown requested");
                None
            }
        };

        let report = self.shutdown().await;
        match server_failure {
            Some(message) => Err(LifecycleError::Server { message, report }),
            None => Ok(report),
        }
    }

    /// Runs the shutdown sequence once. Every caller, concurrent or later,
    /// receives the same report.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.report
            .get_or_init(|| self.shutdown_once())
            .await
            .clone()
    }

    async fn shutdown_once(&self) -> ShutdownReport {
        self.phase.transition(Phase::Running, Phase::Draining);
        let deadline = deadline_after(self.settings.shutdown_timeout);
        let mut report = ShutdownReport::default();
        info!(
            timeout_secs = self.settings.shutdown_timeout.as_secs(),
            "Shutting down"
        );

        let tasks = std::mem::take(&mut *self.tasks.lock().await);

        // 1. Ingestion stops within one poll cycle; preload is cancelled with it.
        self.ingestion_token.cancel();
        self.root.cancel();

        // 2. Graceful HTTP stop.
        self.server_token.cancel();
        if let Some(mut server) = tasks.server {
            match timeout_at(deadline, &mut server).await {
                Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
                Ok(Ok(Err(e))) => report.issues.push(ShutdownIssue::Server(e.to_string())),
                Ok(Err(e)) => report.issues.push(join_issue("server", e)),
                Err(_) => {
                    server.abort();
                    report.issues.push(ShutdownIssue::ServerTimeout);
                }
            }
        }

        // 3. Consumer.
        if let Err(e) = self.consumer.close().await {
            report.issues.push(ShutdownIssue::ConsumerClose(e.to_string()));
        }

        // 4. Store, then cache.
        self.service.repository().close().await;
        self.service.cache().close().await;

        // 5. Remaining tasks.
        if let Some(mut ingestion) = tasks.ingestion {
            match timeout_at(deadline, &mut ingestion).await {
                Ok(Ok(stats)) => report.ingestion = Some(stats),
                Ok(Err(e)) => report.issues.push(join_issue("ingestion", e)),
                Err(_) => {
                    ingestion.abort();
                    report.issues.push(ShutdownIssue::TaskTimeout("ingestion".to_string()));
                }
            }
        }
        if let Some(mut preload) = tasks.preload {
            match timeout_at(deadline, &mut preload).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => report.issues.push(join_issue("preload", e)),
                Err(_) => {
                    preload.abort();
                    report.issues.push(ShutdownIssue::TaskTimeout("preload".to_string()));
                }
            }
        }

        for issue in &report.issues {
            warn!(issue = %issue, "Shutdown issue");
        }
        self.phase.advance_to(Phase::Stopped);
        info!(clean = report.is_clean(), "Shutdown complete");
        report
    }

    fn spawn_preload(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let token = self.root.child_token();
        let limit = self.settings.preload_limit;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => info!("Cache preload cancelled"),
                result = service.preload_recent_orders(limit) => {
                    if let Err(e) = result {
                        error!(error = %e, "Cache preload failed");
                    }
                }
            }
        })
    }

    fn spawn_ingestion(&self) -> JoinHandle<IngestionStats> {
        let ingestion = IngestionLoop::new(self.service.clone(), self.consumer.clone())
            .with_read_error_backoff(self.settings.read_error_backoff);
        tokio::spawn(ingestion.run(self.ingestion_token.clone()))
    }

    fn spawn_server(
        &self,
        router: Router,
        listener: TcpListener,
        failed: oneshot::Sender<String>,
    ) -> JoinHandle<std::io::Result<()>> {
        let token = self.server_token.clone();
        info!(addr = %self.local_addr, "HTTP server listening");

        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = &result {
                let _ = failed.send(e.to_string());
            }
            result
        })
    }
}

/// `now + timeout`, saturating at a far-future instant.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn join_issue(task: &str, e: JoinError) -> ShutdownIssue {
    if e.is_panic() {
        ShutdownIssue::TaskPanicked {
            task: task.to_string(),
            message: e.to_string(),
        }
    } else {
        ShutdownIssue::TaskTimeout(task.to_string())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM signal, initiating graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{in_memory_stream, InMemoryOrderCache, InMemoryOrderRepository};

    async fn application() -> (Arc<Application>, Arc<crate::adapters::InMemoryConsumer>) {
        let service = Arc::new(OrderService::new(
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(InMemoryOrderCache::new()),
            Duration::from_secs(60),
        ));
        let (_stream, consumer) = in_memory_stream();
        let consumer = Arc::new(consumer);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app = Application::new(
            service,
            consumer.clone(),
            Router::new(),
            listener,
            LifecycleSettings::default(),
        )
        .unwrap();
        (Arc::new(app), consumer)
    }

    #[tokio::test]
    async fn shutdown_before_run_stops_everything() {
        let (app, consumer) = application().await;

        let report = app.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(app.phase(), Phase::Stopped);
        assert_eq!(consumer.close_calls(), 1);

        let report = app.run(std::future::pending()).await.unwrap();
        assert!(report.ingestion.is_none());
        assert_eq!(consumer.close_calls(), 1);
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let (app, _consumer) = application().await;

        let first = app.run(async {}).await.unwrap();
        assert!(first.ingestion.is_some());

        let second = app.run(async {}).await;
        assert!(matches!(second, Err(LifecycleError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn unbounded_shutdown_timeout_does_not_panic() {
        let service = Arc::new(OrderService::new(
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(InMemoryOrderCache::new()),
            Duration::from_secs(60),
        ));
        let (_stream, consumer) = in_memory_stream();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app = Application::new(
            service,
            Arc::new(consumer),
            Router::new(),
            listener,
            LifecycleSettings {
                shutdown_timeout: Duration::MAX,
                ..LifecycleSettings::default()
            },
        )
        .unwrap();

        let report = app.run(async {}).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(app.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn deadline_saturates() {
        assert!(deadline_after(Duration::MAX) > Instant::now());
    }

    #[test]
    fn settings_follow_config() {
        let config = Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://db/orders".to_string()),
            "SHUTDOWN_TIMEOUT_SECS" => Some("4".to_string()),
            "CACHE_PRELOAD_LIMIT" => Some("7".to_string()),
            _ => None,
        })
        .unwrap();

        let settings = LifecycleSettings::from(&config);
        assert_eq!(settings.preload_limit, 7);
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(4));
    }
}
