use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::adapters::RedisStreamProducer;
use crate::config::Config;
use crate::services::OrderService;

#[derive(Parser)]
#[command(name = "order-service")]
#[command(about = "Order Service - stream ingestion with cached HTTP lookup", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start ingestion and the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,

    /// Append an order JSON file to the order stream
    Publish {
        /// Path to the order JSON file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config)
        .await
        .context("failed to connect to database")?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool, &config.migrations_dir).await?;
    pool.close().await;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Redis URL: {}", mask_password(&config.redis_url));
    println!(
        "  Stream: {} (group {}, consumer {})",
        config.stream_key, config.stream_group, config.stream_consumer
    );
    println!("  Cache TTL: {}s", config.cache_ttl.as_secs());
    println!("  Preload Limit: {}", config.preload_limit);
    println!("  Shutdown Timeout: {}s", config.shutdown_timeout.as_secs());

    let report = crate::startup::validate_environment(config).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration validation failed");
    }

    tracing::info!("Configuration is valid");
    Ok(())
}

/// Reads an order file, checks it decodes and validates, then appends it to
/// the stream. Invalid orders are refused before they reach the stream.
pub async fn handle_publish(config: &Config, file: &Path) -> anyhow::Result<()> {
    let payload = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let order = OrderService::decode_order(&payload)
        .with_context(|| format!("{} is not a valid order document", file.display()))?;
    crate::validation::validate_order(&order)
        .with_context(|| format!("order {} is invalid", order.order_uid))?;

    let producer = RedisStreamProducer::connect(&config.redis_url, config.stream_key.clone())
        .await
        .context("failed to connect to Redis")?;
    let id = producer
        .publish(&payload)
        .await
        .context("failed to append to stream")?;

    tracing::info!(order_uid = %order.order_uid, entry_id = %id, "Order published");
    println!("✓ Order {} published as entry {}", order.order_uid, id);
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
