use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use super::defaults;

/// Top-level configuration for the Vigil threat analyzer.
/// Deserializes from a TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_server_config")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_api_config")]
    pub api: ApiConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,

    #[serde(default = "defaults::default_scoring_config")]
    pub scoring: ScoringConfig,
}

impl Settings {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: defaults::default_server_config(),
            api: defaults::default_api_config(),
            storage: defaults::default_storage_config(),
            logging: defaults::default_logging_config(),
            scoring: defaults::default_scoring_config(),
        }
    }
}

/// HTTP server configuration (ingestion + admin API share one listener).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind")]
    pub bind: String,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "defaults::default_api_key")]
    pub api_key: String,
}

/// Durable storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_sqlite_path")]
    pub sqlite_path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_file")]
    pub file: String,
}

/// Threat scoring knobs, injected into the engine at construction so
/// tests can run with overridden thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Cumulative score at which a source transitions to Blocked.
    #[serde(default = "defaults::default_block_threshold")]
    pub block_threshold: i64,

    /// Inactivity period after which the score decays, in seconds.
    #[serde(default = "defaults::default_decay_after_secs")]
    pub decay_after_secs: u64,

    /// Amount subtracted from the score per decay, floored at zero.
    #[serde(default = "defaults::default_decay_amount")]
    pub decay_amount: i64,

    /// Inter-request gap below which activity is considered robotic, in ms.
    #[serde(default = "defaults::default_robotic_threshold_ms")]
    pub robotic_threshold_ms: i64,

    /// Substrings that mark a user agent as a known scanner tool.
    #[serde(default = "defaults::default_scanner_user_agents")]
    pub scanner_user_agents: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        defaults::default_scoring_config()
    }
}
