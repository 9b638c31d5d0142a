//! halfclose-echo client
//!
//! usage: halfclose-client <host> <port>
//!
//! Connects, sends a zeroed payload, checks the echo, shuts down writing,
//! waits for the server's close, and starts over.

use clap::Parser;
use halfclose_echo::client;
use halfclose_echo::config::ClientArgs;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Exits with a usage message unless exactly <host> <port> are given
    let args = ClientArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    client::run(&args)
        .await
        .inspect_err(|e| error!(error = %e, "Client stopped"))?;

    Ok(())
}
