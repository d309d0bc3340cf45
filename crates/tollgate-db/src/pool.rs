//! Database connection pools

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::DbResult;

/// Database connection pool type alias
pub type DbPool = PgPool;

/// Pool sizing and acquisition bounds
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum open connections
    pub max_connections: u32,
    /// How long an acquire may wait before surfacing `Unavailable`
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 25,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Create a bounded connection pool
pub async fn create_pool(database_url: &str, settings: &PoolSettings) -> DbResult<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}
