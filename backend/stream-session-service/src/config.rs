/// Configuration management for Stream Session Service
///
/// Loads configuration from environment variables.
use anyhow::{anyhow, Context, Result};
use resilience::{lock_contention_config, RetryConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Hard ceiling for chat text and captions; config may only lower it
pub const CHAT_MAX_CHARS_LIMIT: usize = 500;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Which session store backs the coordinator
    pub store: StoreKind,
    /// Database configuration; present whenever `store` is postgres
    pub database: Option<DatabaseConfig>,
    /// Locking, retry and read limits
    pub coordinator: CoordinatorConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port for health checks and metrics
    pub http_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown SESSION_STORE '{}'", other)),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Longest wait for a per-stream or per-viewer lock, also used as the
    /// Postgres `lock_timeout`
    pub lock_wait_ms: u64,
    /// Attempts per contended operation, first try included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Longest chat text or caption, in characters (at most 500)
    pub chat_max_chars: usize,
    /// Cap on any single chat or switch-history read
    pub history_limit: usize,
    /// Counter reconciler period; 0 disables the worker
    pub reconcile_interval_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let preset = lock_contention_config();
        Self {
            lock_wait_ms: preset.timeout.duration.as_millis() as u64,
            max_attempts: preset.retry.attempts(),
            initial_backoff_ms: preset.retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: preset.retry.max_backoff.as_millis() as u64,
            chat_max_chars: CHAT_MAX_CHARS_LIMIT,
            history_limit: 100,
            reconcile_interval_secs: 60,
        }
    }
}

impl CoordinatorConfig {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_attempts(
            self.max_attempts.max(1),
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.parse().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let app = AppConfig {
            env: get("APP_ENV").unwrap_or_else(|| "development".to_string()),
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port: parsed(&get, "PORT").unwrap_or(8090), // stream-session-service default HTTP port
        };

        let store = match get("SESSION_STORE") {
            Some(value) => value.parse()?,
            None => StoreKind::Postgres,
        };

        let database = match store {
            StoreKind::Postgres => Some(DatabaseConfig {
                url: get("DATABASE_URL").context("DATABASE_URL environment variable not set")?,
                max_connections: parsed(&get, "DB_MAX_CONNECTIONS")
                    .unwrap_or_else(default_max_connections),
                min_connections: parsed(&get, "DB_MIN_CONNECTIONS")
                    .unwrap_or_else(default_min_connections),
            }),
            StoreKind::Memory => None,
        };

        let defaults = CoordinatorConfig::default();
        let coordinator = CoordinatorConfig {
            lock_wait_ms: parsed(&get, "LOCK_WAIT_MS").unwrap_or(defaults.lock_wait_ms),
            max_attempts: parsed(&get, "LOCK_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            initial_backoff_ms: parsed(&get, "RETRY_INITIAL_BACKOFF_MS")
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: parsed(&get, "RETRY_MAX_BACKOFF_MS").unwrap_or(defaults.max_backoff_ms),
            chat_max_chars: parsed(&get, "CHAT_MAX_CHARS")
                .unwrap_or(defaults.chat_max_chars)
                .clamp(1, CHAT_MAX_CHARS_LIMIT),
            history_limit: parsed(&get, "HISTORY_LIMIT").unwrap_or(defaults.history_limit),
            reconcile_interval_secs: parsed(&get, "RECONCILE_INTERVAL_SECS")
                .unwrap_or(defaults.reconcile_interval_secs),
        };

        Ok(Config {
            app,
            store,
            database,
            coordinator,
        })
    }
}
