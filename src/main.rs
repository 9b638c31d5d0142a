//! halfclose-echo server
//!
//! Accepts TCP connections and, for each one, echoes the first request,
//! shuts down writing, then ignores further data until the client closes.

use halfclose_echo::config::Config;
use halfclose_echo::error::FatalError;
use halfclose_echo::server::Acceptor;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().map_err(FatalError::from)?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        dispatch = ?config.dispatch,
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        io_timeout = ?config.io_timeout,
        "Starting halfclose-echo server"
    );

    let acceptor = Acceptor::bind(&config).inspect_err(|e| error!(error = %e, "Startup failed"))?;

    tokio::select! {
        result = acceptor.serve() => {
            result.inspect_err(|e| error!(error = %e, "Server stopped"))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
