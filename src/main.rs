//! Persistent chat server.
//!
//! Entry point: loads configuration, initializes logging and serves the HTTP
//! API.

use std::sync::Arc;

use anyhow::Context;
use mimalloc::MiMalloc;
use tracing::info;

use persistent_chat::config::{AppConfig, load_llm_settings};
use persistent_chat::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenvy::dotenv();

    let config = AppConfig::load().context("failed to load configuration")?;
    telemetry::init(&config.telemetry);

    let settings = match load_llm_settings() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };

    info!(
        name: "config.loaded",
        history_backend = ?config.history.backend,
        port = config.server.port,
        "Configuration loaded"
    );

    server::start_server(Arc::new(config), settings).await
}
