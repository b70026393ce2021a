use anyhow::Context;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;

/// Opens the pool and pings the server once.
pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool, dir: impl AsRef<Path>) -> anyhow::Result<()> {
    let dir = dir.as_ref();
    let migrator = Migrator::new(dir)
        .await
        .with_context(|| format!("failed to load migrations from {}", dir.display()))?;
    migrator.run(pool).await.context("failed to apply migrations")?;
    tracing::info!(dir = %dir.display(), "Database migrations completed");
    Ok(())
}
