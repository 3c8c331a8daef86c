mod api;
mod config;
mod engine;
mod models;
mod storage;

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api::routes::AppState;
use crate::api::server::ApiServer;
use crate::config::settings::Settings;
use crate::engine::analyzer::ThreatAnalyzer;
use crate::storage::sqlite::SqliteStore;
use crate::storage::ThreatStore;

/// Parse the `--config` CLI flag. Defaults to `/opt/vigil/config/vigil.toml`.
fn parse_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from("/opt/vigil/config/vigil.toml");

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                config_path = path.clone();
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    config_path
}

/// Initialise the `tracing` subscriber with both stdout and file output.
/// `RUST_LOG` overrides the configured level.
fn init_tracing(log_file_path: &str, level: &str) {
    if let Some(dir) = std::path::Path::new(log_file_path).parent() {
        let _ = std::fs::create_dir_all(dir);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .expect("Failed to open log file");

    let file_layer = fmt::layer()
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},vigil=debug", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let config_path = parse_config_path();
    let settings = if std::path::Path::new(&config_path).exists() {
        Settings::load(&config_path)?
    } else {
        Settings::default()
    };
    let settings = Arc::new(settings);

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    init_tracing(&settings.logging.file, &settings.logging.level);

    info!("Starting Vigil access-log threat analyzer");
    if std::path::Path::new(&config_path).exists() {
        info!("Config loaded from {}", config_path);
    } else {
        warn!("Config file {} not found, using defaults", config_path);
    }

    // ---------------------------------------------------------------
    // 3. Storage
    // ---------------------------------------------------------------
    if let Some(dir) = std::path::Path::new(&settings.storage.sqlite_path).parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let store: Arc<dyn ThreatStore> = Arc::new(
        SqliteStore::new(&settings.storage.sqlite_path)
            .expect("Failed to initialise SQLite store"),
    );
    info!("Storage layer initialised ({})", settings.storage.sqlite_path);

    // ---------------------------------------------------------------
    // 4. Scoring engine
    // ---------------------------------------------------------------
    let analyzer = Arc::new(ThreatAnalyzer::new(
        store.clone(),
        settings.scoring.clone(),
    ));

    // ---------------------------------------------------------------
    // 5. API server
    // ---------------------------------------------------------------
    let state = AppState {
        store: store.clone(),
        analyzer: analyzer.clone(),
        api_key: settings.api.api_key.clone(),
        start_time: Instant::now(),
    };

    let bind = settings.server.bind.clone();
    let api_server = ApiServer::new(state, bind);

    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            error!("API server error: {}", e);
        }
    });

    info!("Vigil is running. Press Ctrl+C to shut down.");

    // ---------------------------------------------------------------
    // 6. Wait for shutdown signal
    // ---------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutting down Vigil...");

    api_handle.abort();

    info!("Vigil shut down gracefully");
    Ok(())
}
