//! PostgreSQL setup and connection helpers.

use std::time::Duration;

use parley_common::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};

use crate::store::StoreResult;

/// Open a pool; every connection gets the configured `statement_timeout`.
pub async fn connect(config: &DatabaseConfig) -> StoreResult<PgPool> {
    let options: PgConnectOptions = config.url.parse()?;
    let timeout_ms = config.statement_timeout_ms;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute(format!("SET statement_timeout = {timeout_ms}").as_str())
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Health check — verify the database is reachable.
pub async fn health_check(pool: &PgPool) -> StoreResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
