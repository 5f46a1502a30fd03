//! Application configuration loaded from environment variables.

use std::collections::HashMap;
use std::time::Duration;

use common::ProductId;
use domain::Money;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `"json"` for JSON logs, anything else for text
/// - `DATABASE_URL` — PostgreSQL URL; in-memory storage when unset
/// - `DB_MAX_CONNECTIONS` — transaction pool size (default: `10`)
/// - `LOCK_MAX_CONNECTIONS` — advisory lock pool size (default: `10`)
/// - `LOCK_TIMEOUT_MS` — lock acquisition timeout; waits forever when unset
/// - `LOCK_POLL_INTERVAL_MS` — advisory lock retry delay (default: `25`)
/// - `PRICE_CATALOG` — JSON object mapping product IDs to prices in cents
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub lock_max_connections: u32,
    pub lock_timeout: Option<Duration>,
    pub lock_poll_interval: Duration,
    pub price_catalog: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
        };

        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.db_max_connections),
            lock_max_connections: std::env::var("LOCK_MAX_CONNECTIONS")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.lock_max_connections),
            lock_timeout: millis("LOCK_TIMEOUT_MS"),
            lock_poll_interval: millis("LOCK_POLL_INTERVAL_MS")
                .unwrap_or(defaults.lock_poll_interval),
            price_catalog: std::env::var("PRICE_CATALOG").ok(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses the configured price catalog; empty when none is set.
    pub fn prices(&self) -> Result<Vec<(ProductId, Money)>, serde_json::Error> {
        match &self.price_catalog {
            Some(raw) => parse_price_catalog(raw),
            None => Ok(Vec::new()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            db_max_connections: 10,
            lock_max_connections: 10,
            lock_timeout: None,
            lock_poll_interval: Duration::from_millis(25),
            price_catalog: None,
        }
    }
}

/// Parses a JSON object of `{"<product uuid>": <cents>}`.
pub fn parse_price_catalog(raw: &str) -> Result<Vec<(ProductId, Money)>, serde_json::Error> {
    let catalog: HashMap<ProductId, i64> = serde_json::from_str(raw)?;
    Ok(catalog
        .into_iter()
        .map(|(product_id, cents)| (product_id, Money::from_cents(cents)))
        .collect())
}
