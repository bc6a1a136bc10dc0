//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

use crate::pagination::{DEFAULT_PAGE_NUMBER, DEFAULT_PAGE_SIZE, QueryDefaults};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Seconds to wait for a pooled connection (default: 5).
    pub database_acquire_timeout_secs: u64,

    /// Page used when a request omits pagination (default: 1).
    pub default_page: u32,

    /// Page size used when a request omits pagination (default: 10).
    pub default_limit: u32,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let database_acquire_timeout_secs = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("DATABASE_ACQUIRE_TIMEOUT_SECS must be a valid u64")?;

        let default_page = env::var("QUERY_DEFAULT_PAGE")
            .map(|v| v.parse().context("QUERY_DEFAULT_PAGE must be a valid u32"))
            .unwrap_or(Ok(DEFAULT_PAGE_NUMBER))?;

        let default_limit = env::var("QUERY_DEFAULT_LIMIT")
            .map(|v| v.parse().context("QUERY_DEFAULT_LIMIT must be a valid u32"))
            .unwrap_or(Ok(DEFAULT_PAGE_SIZE))?;

        if default_page == 0 || default_limit == 0 {
            anyhow::bail!("QUERY_DEFAULT_PAGE and QUERY_DEFAULT_LIMIT must be positive");
        }

        Ok(Self {
            database_url,
            database_max_connections,
            database_acquire_timeout_secs,
            default_page,
            default_limit,
        })
    }

    /// Pagination defaults for repositories built from this config.
    pub fn query_defaults(&self) -> QueryDefaults {
        QueryDefaults {
            page: self.default_page,
            limit: self.default_limit,
        }
    }
}
