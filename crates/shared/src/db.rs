//! Database connection pooling utilities

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Type alias for the database pool
pub type DbPool = PgPool;

/// Create a new database connection pool
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.connection_url())
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "database connection pool created"
    );

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(_pool: &DbPool) -> Result<()> {
    // Migrations are applied out of band (see the store crate's
    // migrations/ directory); this is a logging placeholder kept at the
    // boundary the rest of the stack reserves for it.
    tracing::info!("database migrations should be run out of band");
    Ok(())
}

/// Check database connection health
pub async fn check_health(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
