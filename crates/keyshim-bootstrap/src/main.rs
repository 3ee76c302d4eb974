// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! keyshim bootstrap - function runtime entry point
//!
//! Runs as the function's custom runtime:
//! - Loads configuration and builds the per-environment session
//! - Pulls invocations from the runtime API
//! - Bootstraps the secrets server on first use and proxies every request to it

use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

use keyshim_bootstrap::config::Config;
use keyshim_bootstrap::runtime_api::{self, RuntimeApiClient};
use keyshim_bootstrap::session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyshim_bootstrap=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let client = RuntimeApiClient::from_env()?;

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            client.send_init_error("Runtime.ConfigError", &e.to_string()).await?;
            return Err(e.into());
        }
    };

    info!(
        bucket = %config.bucket_name,
        executable = %config.executable_name,
        staging_dir = %config.staging_dir.display(),
        upstream = %config.upstream_addr,
        "Starting keyshim bootstrap"
    );

    let mut session = match Session::from_config(config).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to initialize session");
            client.send_init_error("Runtime.InitError", &e.to_string()).await?;
            return Err(e.into());
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let result = tokio::select! {
        result = runtime_api::run(&client, &mut session) => result.map_err(anyhow::Error::from),
        _ = sigterm.recv() => {
            info!("SIGTERM received");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    // The server is only stopped when the runtime itself goes away
    session.shutdown().await;

    info!("keyshim bootstrap shut down");

    result
}
