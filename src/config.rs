use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    /// Reconciliation loop configuration
    #[serde(default)]
    pub sync: SyncConfig,
    /// SQLite connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
}

/// Upstream trip updates feed endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// API key, sent as a query parameter on every fetch
    pub api_key: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "FeedConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl FeedConfig {
    fn default_timeout_secs() -> u64 {
        30
    }
}

/// Configuration for the feed reconciliation loop
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Interval in seconds between reconciliation cycles (default: 30)
    #[serde(default = "SyncConfig::default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
        }
    }
}

impl SyncConfig {
    fn default_interval_secs() -> u64 {
        30
    }
}

fn default_database_url() -> String {
    "sqlite:database/data.db?mode=rwc".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
