// =====================================================================================
// File: core-database/src/postgres.rs
// Description: PostgreSQL connection pool construction
// =====================================================================================

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;
use tracing::info;

use core_config::DatabaseConfig;

use crate::DatabaseError;

/// Create a PostgreSQL connection pool from configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool<Postgres>, DatabaseError> {
    info!("Creating PostgreSQL connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .max_lifetime(Duration::from_secs(config.max_lifetime))
        .connect(&config.url)
        .await
        .map_err(|e| {
            DatabaseError::Connection(format!("Failed to create PostgreSQL pool: {}", e))
        })?;

    // Test the connection
    let _conn = pool.acquire().await.map_err(|e| {
        DatabaseError::Connection(format!("Failed to acquire connection from pool: {}", e))
    })?;

    info!("PostgreSQL connection pool created successfully");
    Ok(pool)
}
