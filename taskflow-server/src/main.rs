//! `TaskFlow` sync server -- authoritative task board with realtime fan-out.
//!
//! An axum WebSocket server holding the authoritative ordered task state
//! for each owner. Clients authenticate with a bearer token, mutate
//! their board through request frames, and receive every committed
//! change as a pushed event.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:10000
//! cargo run --bin taskflow-server
//!
//! # Run on custom address
//! cargo run --bin taskflow-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! TASKFLOW_ADDR=127.0.0.1:8080 cargo run --bin taskflow-server
//! ```

use std::sync::Arc;

use clap::Parser;
use taskflow_server::auth::TokenTable;
use taskflow_server::config::{CliArgs, ServerConfig};
use taskflow_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting taskflow sync server");

    let gate = TokenTable::from_tokens(&config.tokens);
    if gate.is_empty() {
        tracing::warn!("no auth tokens configured; every connection will be denied");
    }
    let state = Arc::new(ServerState::with_config(
        Arc::new(gate),
        config.max_payload_size,
    ));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "sync server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "sync server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start sync server");
            std::process::exit(1);
        }
    }
}
