//! Service configuration.

use std::time::Duration;

use seatledger_store::StoreOptions;

/// Configuration errors reported by [`ServiceConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Lock waits must be bounded by a non-zero ceiling.
    #[error("LOCK_WAIT_TIMEOUT_MS must be greater than zero")]
    ZeroLockWait,

    /// The Postgres pool needs at least one connection.
    #[error("DATABASE_MAX_CONNECTIONS must be greater than zero")]
    ZeroMaxConnections,

    /// The payment log endpoint is not an absolute http(s) URL.
    #[error("PAYMENT_LOG_URL is not a valid http(s) URL: {0}")]
    InvalidPaymentLogUrl(String),

    /// No storage backend is available for this configuration.
    #[error("no storage backend: set DATABASE_URL or build with the rocksdb-backend feature")]
    NoBackend,
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to `RocksDB` data directory (default: "/data/seatledger").
    pub data_dir: String,

    /// PostgreSQL connection URL. When set, the Postgres backend is used.
    pub database_url: Option<String>,

    /// Postgres pool size (default: 10).
    pub database_max_connections: u32,

    /// Ceiling for waiting on a course lock, in milliseconds (default: 5000).
    pub lock_wait_timeout_ms: u64,

    /// HS256 secret for buyer tokens. Without it every real token is
    /// rejected.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT issuer (default: "classpick").
    pub auth_issuer: String,

    /// Expected JWT audience (default: "seatledger").
    pub auth_audience: String,

    /// Endpoint receiving committed ledger entries (optional).
    pub payment_log_url: Option<String>,

    /// Payment log request timeout in seconds (default: 10).
    pub payment_log_timeout_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable numbers fall back to their defaults; call
    /// [`validate`](Self::validate) before use.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            lock_wait_timeout_ms: env_parse("LOCK_WAIT_TIMEOUT_MS", defaults.lock_wait_timeout_ms),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_issuer: std::env::var("AUTH_ISSUER").unwrap_or(defaults.auth_issuer),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            payment_log_url: std::env::var("PAYMENT_LOG_URL").ok(),
            payment_log_timeout_seconds: env_parse(
                "PAYMENT_LOG_TIMEOUT_SECONDS",
                defaults.payment_log_timeout_seconds,
            ),
        }
    }

    /// Check the configuration before any backend is opened.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_wait_timeout_ms == 0 {
            return Err(ConfigError::ZeroLockWait);
        }

        if self.database_url.is_some() && self.database_max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }

        if let Some(url) = &self.payment_log_url {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| ConfigError::InvalidPaymentLogUrl(format!("{url}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidPaymentLogUrl(url.clone()));
            }
        }

        Ok(())
    }

    /// The configured lock wait ceiling.
    #[must_use]
    pub const fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    /// Options shared by every store backend.
    #[must_use]
    pub const fn store_options(&self) -> StoreOptions {
        StoreOptions {
            lock_wait: self.lock_wait(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: "/data/seatledger".into(),
            database_url: None,
            database_max_connections: 10,
            lock_wait_timeout_ms: 5000,
            auth_jwt_secret: None,
            auth_issuer: "classpick".into(),
            auth_audience: "seatledger".into(),
            payment_log_url: None,
            payment_log_timeout_seconds: 10,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
