//! Application configuration loaded from environment variables.

use std::time::Duration;

use contact_mediation::ReopenPolicy;

use crate::errors::{MarketError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (e.g. `sqlite:./marketplace.db` or `sqlite::memory:`)
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Upper bound on any single unit of work against the store
    pub store_timeout_ms: u64,
    /// Connection pool size. In-memory databases always use one connection.
    pub db_max_connections: u32,
    /// How many times a buyer may reopen a rejected request (0 = unlimited)
    pub max_reopens: u32,
    /// Whether suspending an account revokes previously granted disclosures
    pub revoke_on_suspension: bool,
    /// How often (in seconds) to sweep expired subscriptions
    pub sweep_interval_secs: u64,
    /// Shared secret expected from the payment collaborator. Unset disables
    /// the credit endpoints.
    pub payment_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite:./marketplace.db".to_string(),
            api_port: 3001,
            store_timeout_ms: 2_000,
            db_max_connections: 5,
            max_reopens: ReopenPolicy::default().max_reopens,
            revoke_on_suspension: true,
            sweep_interval_secs: 300,
            payment_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        Ok(Config {
            database_url: env_var("DATABASE_URL").unwrap_or(defaults.database_url),
            api_port: parse_or("API_PORT", defaults.api_port)?,
            store_timeout_ms: parse_or("STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            max_reopens: parse_or("MAX_REOPENS", defaults.max_reopens)?,
            revoke_on_suspension: parse_or(
                "REVOKE_ON_SUSPENSION",
                defaults.revoke_on_suspension,
            )?,
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            payment_token: env_var("PAYMENT_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    /// Configuration for an isolated in-memory database.
    pub fn in_memory() -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            ..Config::default()
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Never zero; a zero period would spin the sweeper.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn reopen_policy(&self) -> ReopenPolicy {
        ReopenPolicy {
            max_reopens: self.max_reopens,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| MarketError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MarketError::Config(format!("Invalid {key}: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
