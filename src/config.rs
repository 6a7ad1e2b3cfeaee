// src/config.rs
use crate::error::ConfigError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const MAX_QUOTE_TIMEOUT_SECS: u64 = 300;
// one year
const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Scylla,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scylla" => Ok(StorageBackend::Scylla),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub storage: StorageBackend,
    pub scylla_node: String,
    pub keyspace: String,
    pub quote_api_url: String,
    pub quote_api_key: String,
    pub quote_timeout: Duration,
    pub session_secret: String,
    pub session_ttl: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &'static str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingKey(key))
        };

        let listen_addr = parse(
            "FINANCE_TRACKER_ADDR",
            var("FINANCE_TRACKER_ADDR", "127.0.0.1:3030"),
        )?;
        let storage = parse(
            "FINANCE_TRACKER_STORAGE",
            var("FINANCE_TRACKER_STORAGE", "scylla"),
        )?;
        let quote_timeout = parse_secs(
            "QUOTE_TIMEOUT_SECS",
            var("QUOTE_TIMEOUT_SECS", "5"),
            MAX_QUOTE_TIMEOUT_SECS,
        )?;
        let session_ttl = parse_secs(
            "SESSION_TTL_SECS",
            var("SESSION_TTL_SECS", "86400"),
            MAX_SESSION_TTL_SECS,
        )?;

        let keyspace = var("SCYLLA_KEYSPACE", "finance_tracker");
        if !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::InvalidValue {
                key: "SCYLLA_KEYSPACE",
                value: keyspace,
            });
        }

        Ok(Config {
            listen_addr,
            storage,
            scylla_node: var("SCYLLA_NODE", "127.0.0.1:9042"),
            keyspace,
            quote_api_url: var("QUOTE_API_URL", "https://api.twelvedata.com"),
            quote_api_key: required("QUOTE_API_KEY")?,
            quote_timeout,
            session_secret: required("SESSION_SECRET")?,
            session_ttl,
        })
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(_) => Err(ConfigError::InvalidValue { key, value }),
    }
}

/// A whole number of seconds in `1..=max`.
fn parse_secs(key: &'static str, value: String, max: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = parse(key, value.clone())?;
    if secs == 0 || secs > max {
        return Err(ConfigError::InvalidValue { key, value });
    }
    Ok(Duration::from_secs(secs))
}
