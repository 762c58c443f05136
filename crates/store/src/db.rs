/// Connection pool and migration runner for the policy store.
///
/// Mirrors the teacher's `api-server::db` module: an env-driven
/// `DatabaseConfig`, a `PgPoolOptions`-built pool with an acquire timeout,
/// `sqlx::migrate!`-driven schema application, and a trivial health check.
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let connection_timeout = std::env::var("DB_CONNECTION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            url,
            max_connections,
            min_connections,
            connection_timeout,
        })
    }
}

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    tracing::info!("initializing policy store connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .connect(&config.url)
        .await
        .context("failed to create database connection pool")?;

    tracing::info!("policy store connection pool established");

    Ok(pool)
}

/// Applies pending migrations. Every statement in `migrations/` is written
/// to be a no-op on re-run (spec §6.5).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("running policy store migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run policy store migrations")?;

    tracing::info!("policy store migrations complete");

    Ok(())
}

pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("policy store health check failed")?;

    Ok(())
}
