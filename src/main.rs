use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use order_service::adapters::{
    PostgresOrderRepository, RedisOrderCache, RedisStreamConsumer, StreamSettings,
};
use order_service::cli::{self, Cli, Commands, DbCommands};
use order_service::config::{Config, LogFormat};
use order_service::health::{HealthCheck, PostgresChecker, RedisChecker};
use order_service::lifecycle::{self, Application, LifecycleError, LifecycleSettings};
use order_service::services::OrderService;
use order_service::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Config) => cli::handle_config_validate(&config).await,
        Some(Commands::Publish { file }) => cli::handle_publish(&config, &file).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // Database pool
    let pool = db::create_pool(&config)
        .await
        .context("failed to connect to database")?;
    db::run_migrations(&pool, &config.migrations_dir).await?;

    // Cache
    let cache = RedisOrderCache::connect(&config.redis_url)
        .await
        .context("failed to connect to Redis cache")?;

    // Stream consumer
    let consumer = RedisStreamConsumer::connect(
        &config.redis_url,
        StreamSettings {
            stream: config.stream_key.clone(),
            group: config.stream_group.clone(),
            consumer: config.stream_consumer.clone(),
            block: config.stream_block,
        },
    )
    .await
    .context("failed to connect to order stream")?;

    let health_conn = redis::Client::open(config.redis_url.as_str())?
        .get_multiplexed_async_connection()
        .await
        .context("failed to open Redis health connection")?;
    let health = HealthCheck::new()
        .critical("postgres", Arc::new(PostgresChecker::new(pool.clone())))
        .optional("redis", Arc::new(RedisChecker::new(health_conn)));

    let orders = Arc::new(OrderService::new(
        Arc::new(PostgresOrderRepository::new(pool)),
        Arc::new(cache),
        config.cache_ttl,
    ));

    let app = create_app(AppState {
        orders: orders.clone(),
        health: Arc::new(health),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let application = Application::new(
        orders,
        Arc::new(consumer),
        app,
        listener,
        LifecycleSettings::from(&config),
    )?;
    tracing::info!("listening on {}", application.local_addr());

    match application.run(lifecycle::shutdown_signal()).await {
        Ok(report) => {
            tracing::info!(clean = report.is_clean(), "Order service stopped");
            Ok(())
        }
        Err(LifecycleError::Server { message, .. }) => {
            anyhow::bail!("HTTP server failed: {}", message)
        }
        Err(e) => Err(e.into()),
    }
}
