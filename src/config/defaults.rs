use super::settings::{
    ApiConfig, LoggingConfig, ScoringConfig, ServerConfig, StorageConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
    }
}

pub fn default_api_config() -> ApiConfig {
    ApiConfig {
        api_key: default_api_key(),
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        sqlite_path: default_sqlite_path(),
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file: default_log_file(),
    }
}

pub fn default_scoring_config() -> ScoringConfig {
    ScoringConfig {
        block_threshold: default_block_threshold(),
        decay_after_secs: default_decay_after_secs(),
        decay_amount: default_decay_amount(),
        robotic_threshold_ms: default_robotic_threshold_ms(),
        scanner_user_agents: default_scanner_user_agents(),
    }
}

// ---------------------------------------------------------------------------
// Field defaults
// ---------------------------------------------------------------------------

pub fn default_bind() -> String {
    "0.0.0.0:8090".to_string()
}

pub fn default_api_key() -> String {
    "change-me".to_string()
}

pub fn default_sqlite_path() -> String {
    "/opt/vigil/data/vigil.db".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_file() -> String {
    "/opt/vigil/logs/vigil.log".to_string()
}

pub fn default_block_threshold() -> i64 {
    100
}

pub fn default_decay_after_secs() -> u64 {
    86_400
}

pub fn default_decay_amount() -> i64 {
    20
}

pub fn default_robotic_threshold_ms() -> i64 {
    150
}

pub fn default_scanner_user_agents() -> Vec<String> {
    [
        "sqlmap",
        "nmap",
        "gobuster",
        "nikto",
        "wfuzz",
        "acunetix",
        "netsparker",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
