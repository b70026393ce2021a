use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for `CACHE_TTL_SECS`: 30 days.
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;
/// Upper bound for `SHUTDOWN_TIMEOUT_SECS`.
pub const MAX_SHUTDOWN_TIMEOUT_SECS: u64 = 3600;
/// Upper bound for `STREAM_BLOCK_MS` and `READ_ERROR_BACKOFF_MS`.
pub const MAX_POLL_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format '{}', expected 'text' or 'json'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub migrations_dir: String,
    pub redis_url: String,
    pub cache_ttl: Duration,
    pub preload_limit: i64,
    pub stream_key: String,
    pub stream_group: String,
    pub stream_consumer: String,
    pub stream_block: Duration,
    pub read_error_backoff: Duration,
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let cache_ttl_secs: u64 = parse(&lookup, "CACHE_TTL_SECS", "3600")?;
        if cache_ttl_secs == 0 {
            anyhow::bail!("CACHE_TTL_SECS must be greater than 0");
        }
        at_most("CACHE_TTL_SECS", cache_ttl_secs, MAX_CACHE_TTL_SECS)?;

        let shutdown_timeout_secs: u64 = parse(&lookup, "SHUTDOWN_TIMEOUT_SECS", "15")?;
        at_most("SHUTDOWN_TIMEOUT_SECS", shutdown_timeout_secs, MAX_SHUTDOWN_TIMEOUT_SECS)?;

        let stream_block_ms: u64 = parse(&lookup, "STREAM_BLOCK_MS", "1000")?;
        at_most("STREAM_BLOCK_MS", stream_block_ms, MAX_POLL_MS)?;

        let read_error_backoff_ms: u64 = parse(&lookup, "READ_ERROR_BACKOFF_MS", "2000")?;
        at_most("READ_ERROR_BACKOFF_MS", read_error_backoff_ms, MAX_POLL_MS)?;

        let preload_limit: i64 = parse(&lookup, "CACHE_PRELOAD_LIMIT", "100")?;
        if preload_limit < 0 {
            anyhow::bail!("CACHE_PRELOAD_LIMIT must not be negative");
        }

        Ok(Config {
            server_port: parse(&lookup, "SERVER_PORT", "8080")?,
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", "10")?,
            migrations_dir: var("MIGRATIONS_DIR", "./migrations"),
            redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            preload_limit,
            stream_key: var("STREAM_KEY", "orders"),
            stream_group: var("STREAM_GROUP", "order-service"),
            stream_consumer: var("STREAM_CONSUMER", "order-service-1"),
            stream_block: Duration::from_millis(stream_block_ms),
            read_error_backoff: Duration::from_millis(read_error_backoff_ms),
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
            log_format: parse(&lookup, "LOG_FORMAT", "text")?,
        })
    }
}

fn at_most(key: &str, value: u64, max: u64) -> anyhow::Result<()> {
    if value > max {
        anyhow::bail!("{} must be at most {}, got {}", key, max, value);
    }
    Ok(())
}

fn parse<T, F>(lookup: &F, key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", raw, key, e))
}
