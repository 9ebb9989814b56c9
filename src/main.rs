//! Wayback Core - time-travelling HTTP proxy runtime
//!
//! Starts the shared state and the thread-per-connection server with the
//! built-in status handler.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wayback_core::{Config, SharedState, StatusHandler, ThreadedServer};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Load configuration (JSON file named by `WAYBACK_CONFIG`, then env overrides)
/// 2. Initialize tracing subscriber for logging
/// 3. Build the shared state and load the whitelist
/// 4. Bind the listening socket; failure here is fatal
/// 5. Serve until Ctrl+C or SIGTERM, then stop accepting; in-flight workers
///    are abandoned when the process exits
fn main() -> Result<()> {
    let config_path = env::var("WAYBACK_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Error loading config from {}", config_path))?;

    // Defaults to "info" (or "warn" when silent), can be overridden with RUST_LOG
    let default_filter = if config.silent {
        "wayback_core=warn"
    } else {
        "wayback_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Wayback proxy on port {}", config.listen_port);
    info!(
        "Configuration loaded: date={}, tolerance={}d, pool={}x{}, max_inbound={:?}",
        config.date,
        config.date_tolerance,
        config.pool.max_hosts,
        config.pool.max_per_host,
        config.max_inbound
    );

    let mut state = SharedState::from_config(&config).context("Invalid runtime configuration")?;
    state.load_whitelist(&config.whitelist_path);
    let state = Arc::new(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let server = ThreadedServer::bind(addr, state, StatusHandler, config.max_inbound)
        .with_context(|| format!("Failed to start server on port {}", config.listen_port))?;

    let (handle, accept_loop) = server.spawn().context("Failed to start accept loop")?;
    handle
        .shutdown_on_signal()
        .context("Failed to install shutdown handler")?;

    match accept_loop.join() {
        Ok(result) => result.context("Accept loop failed")?,
        Err(_) => anyhow::bail!("Accept loop panicked"),
    }

    info!("Server shutdown complete");
    Ok(())
}
