//! Connection pool for the engine's PostgreSQL store.

use std::time::Duration;

use anyhow::{Context, Result, ensure};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::EngineConfig;

/// `to_jsonb`, which every select renders through, arrived in 9.5.
const MIN_SERVER_VERSION: i32 = 90_500;

/// Connect a pool and verify the server can run rendered statements.
pub async fn create_pool(config: &EngineConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(config.database_acquire_timeout_secs))
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    let version: String = sqlx::query_scalar("SHOW server_version_num")
        .fetch_one(&pool)
        .await
        .context("failed to read server version")?;
    let version: i32 = version
        .trim()
        .parse()
        .with_context(|| format!("unexpected server_version_num '{version}'"))?;
    ensure!(
        version >= MIN_SERVER_VERSION,
        "PostgreSQL {version} lacks jsonb support; 9.5 or newer is required"
    );

    tracing::info!(
        max_connections = config.database_max_connections,
        server_version = version,
        "query engine pool ready"
    );
    Ok(pool)
}

/// Whether the store answers a JSON projection like the ones selects use.
pub async fn check_health(pool: &PgPool) -> bool {
    sqlx::query_scalar::<_, serde_json::Value>("SELECT to_jsonb(1)")
        .fetch_one(pool)
        .await
        .is_ok_and(|v| v == serde_json::json!(1))
}
