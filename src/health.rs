use async_trait::async_trait;
use futures::future::join_all;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use utoipa::ToSchema;

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

impl HealthResponse {
    pub fn is_unhealthy(&self) -> bool {
        self.status == "unhealthy"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

pub struct RedisChecker {
    conn: MultiplexedConnection,
}

impl RedisChecker {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DependencyChecker for RedisChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        let mut conn = self.conn.clone();
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

struct Dependency {
    name: String,
    critical: bool,
    checker: Arc<dyn DependencyChecker>,
}

/// Runs the registered dependency checks concurrently, each bounded by
/// [`CHECK_TIMEOUT`]. A failed critical dependency makes the service
/// `unhealthy`; any other failure makes it `degraded`.
pub struct HealthCheck {
    dependencies: Vec<Dependency>,
    started_at: Instant,
    check_timeout: Duration,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            dependencies: Vec::new(),
            started_at: Instant::now(),
            check_timeout: CHECK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    pub fn critical(self, name: &str, checker: Arc<dyn DependencyChecker>) -> Self {
        self.register(name, true, checker)
    }

    pub fn optional(self, name: &str, checker: Arc<dyn DependencyChecker>) -> Self {
        self.register(name, false, checker)
    }

    fn register(mut self, name: &str, critical: bool, checker: Arc<dyn DependencyChecker>) -> Self {
        self.dependencies.push(Dependency {
            name: name.to_string(),
            critical,
            checker,
        });
        self
    }

    pub async fn check(&self) -> HealthResponse {
        let checks = self.dependencies.iter().map(|dep| async move {
            let status = timeout(self.check_timeout, dep.checker.check())
                .await
                .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
            (dep, status)
        });
        let results = join_all(checks).await;

        let mut has_critical_failure = false;
        let mut has_non_critical_failure = false;
        let mut dependencies = HashMap::new();

        for (dep, status) in results {
            if matches!(status, DependencyStatus::Unhealthy { .. }) {
                tracing::warn!(dependency = %dep.name, critical = dep.critical, "Dependency check failed");
                if dep.critical {
                    has_critical_failure = true;
                } else {
                    has_non_critical_failure = true;
                }
            }
            dependencies.insert(dep.name.clone(), status);
        }

        HealthResponse {
            status: determine_overall_status(has_critical_failure, has_non_critical_failure)
                .to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            dependencies,
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

fn determine_overall_status(critical_failure: bool, non_critical_failure: bool) -> &'static str {
    if critical_failure {
        "unhealthy"
    } else if non_critical_failure {
        "degraded"
    } else {
        "healthy"
    }
}
