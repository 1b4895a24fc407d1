//! Configuration management for Comment Service
//!
//! Loads store and subscription settings from environment variables.
use crate::error::{ServiceError, ServiceResult};
use crate::subscription::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Post/comment storage configuration
    pub storage: StorageConfig,
    /// Live subscription configuration
    pub subscriptions: SubscriptionConfig,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Upper bound for a single store operation
    pub query_timeout_ms: u64,
    /// Required when `backend` is `Postgres`
    pub database: Option<DatabaseConfig>,
}

impl StorageConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            query_timeout_ms: default_query_timeout_ms(),
            database: None,
        }
    }
}

/// Database pool configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

/// Subscription broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Comments buffered per subscriber before the overflow policy kicks in
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> ServiceResult<Self> {
        let backend: StorageBackend = std::env::var("COMMENT_STORE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()
            .map_err(ServiceError::Config)?;

        let database = match (backend, std::env::var("DATABASE_URL")) {
            (_, Ok(url)) => Some(DatabaseConfig {
                url,
                max_connections: parse_env_or_default("DB_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env_or_default("DB_MIN_CONNECTIONS", 1)?,
                acquire_timeout_secs: parse_env_or_default("DB_ACQUIRE_TIMEOUT_SECS", 5)?,
            }),
            (StorageBackend::Postgres, Err(_)) => {
                return Err(ServiceError::Config(
                    "DATABASE_URL must be set for the postgres backend".to_string(),
                ))
            }
            (StorageBackend::Memory, Err(_)) => None,
        };

        let buffer_capacity =
            parse_env_or_default("SUBSCRIPTION_BUFFER_CAPACITY", default_buffer_capacity())?;
        if buffer_capacity == 0 {
            return Err(ServiceError::Config(
                "SUBSCRIPTION_BUFFER_CAPACITY must be greater than 0".to_string(),
            ));
        }

        Ok(Config {
            storage: StorageConfig {
                backend,
                query_timeout_ms: parse_env_or_default(
                    "COMMENT_STORE_QUERY_TIMEOUT_MS",
                    default_query_timeout_ms(),
                )?,
                database,
            },
            subscriptions: SubscriptionConfig {
                buffer_capacity,
                overflow_policy: std::env::var("SUBSCRIPTION_OVERFLOW_POLICY")
                    .ok()
                    .map(|v| v.parse::<OverflowPolicy>())
                    .transpose()
                    .map_err(ServiceError::Config)?
                    .unwrap_or_default(),
            },
        })
    }
}

fn parse_env_or_default<T>(key: &str, default: T) -> ServiceResult<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val.parse().map_err(|e| {
            ServiceError::Config(format!("Failed to parse {}='{}': {}", key, val, e))
        }),
        Err(_) => Ok(default),
    }
}

fn default_query_timeout_ms() -> u64 {
    2_000
}

fn default_buffer_capacity() -> usize {
    64
}
