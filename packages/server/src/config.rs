use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Default deadline applied to each core operation; `None` disables it.
    pub operation_timeout: Option<Duration>,
    /// Upper bound on ledger history page sizes.
    pub ledger_history_max_page: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let operation_timeout_ms: u64 = env::var("OPERATION_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .context("OPERATION_TIMEOUT_MS must be a valid number")?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            operation_timeout: (operation_timeout_ms > 0)
                .then(|| Duration::from_millis(operation_timeout_ms)),
            ledger_history_max_page: env::var("LEDGER_HISTORY_MAX_PAGE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("LEDGER_HISTORY_MAX_PAGE must be a valid number")?,
        })
    }

    /// Configuration for tests and tools that already hold a database URL.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            database_max_connections: 10,
            operation_timeout: Some(Duration::from_secs(30)),
            ledger_history_max_page: 100,
        }
    }
}
