//! Configuration loading and representation.
//!
//! Read from environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `DATABASE_URL` | unset | Postgres connection string |
//! | `USE_PERSISTENT_STORES` | `false` | Use Postgres instead of the in-memory store |
//! | `DATABASE_MAX_CONNECTIONS` | `10` | Pool size |
//! | `STOCK_LOCK_TIMEOUT_MS` | `5000` | Wait bound for a snapshot row lock |
//! | `STOCK_IDEMPOTENCY_WAIT_MS` | `10000` | Wait bound for an in-flight duplicate key |
//! | `STOCK_KARDEX_MAX_PAGE_SIZE` | `1000` | Cap applied to kardex page limits |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ledger_store::MAX_PAGE_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
    pub max_connections: u32,
    pub lock_timeout: Duration,
    pub idempotency_wait: Duration,
    pub kardex_max_page_size: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            use_persistent_stores: false,
            max_connections: 10,
            lock_timeout: Duration::from_millis(5_000),
            idempotency_wait: Duration::from_millis(10_000),
            kardex_max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let use_persistent_stores = parse_or(&lookup, "USE_PERSISTENT_STORES", false)?;
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?;
        let lock_timeout_ms = parse_or(
            &lookup,
            "STOCK_LOCK_TIMEOUT_MS",
            defaults.lock_timeout.as_millis() as u64,
        )?;
        let idempotency_wait_ms = parse_or(
            &lookup,
            "STOCK_IDEMPOTENCY_WAIT_MS",
            defaults.idempotency_wait.as_millis() as u64,
        )?;
        let kardex_max_page_size =
            parse_or(&lookup, "STOCK_KARDEX_MAX_PAGE_SIZE", defaults.kardex_max_page_size)?;
        if kardex_max_page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "STOCK_KARDEX_MAX_PAGE_SIZE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            use_persistent_stores,
            max_connections,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            idempotency_wait: Duration::from_millis(idempotency_wait_ms),
            kardex_max_page_size,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.kardex_max_page_size, 1000);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = LedgerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/stock"),
            ("USE_PERSISTENT_STORES", "true"),
            ("STOCK_LOCK_TIMEOUT_MS", "250"),
            ("STOCK_IDEMPOTENCY_WAIT_MS", " 750 "),
            ("STOCK_KARDEX_MAX_PAGE_SIZE", "200"),
        ]))
        .unwrap();

        assert!(config.use_persistent_stores);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/stock"));
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.idempotency_wait, Duration::from_millis(750));
        assert_eq!(config.kardex_max_page_size, 200);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = LedgerConfig::from_lookup(lookup(&[("STOCK_LOCK_TIMEOUT_MS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "STOCK_LOCK_TIMEOUT_MS",
                value: "soon".to_string()
            }
        );

        let err = LedgerConfig::from_lookup(lookup(&[("STOCK_KARDEX_MAX_PAGE_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STOCK_KARDEX_MAX_PAGE_SIZE", .. }));
    }

    #[test]
    fn persistent_stores_require_a_database_url() {
        let err = LedgerConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingDatabaseUrl);
    }
}
