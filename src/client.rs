//! Client driver: repeats the half-close exchange against one server.
//!
//! Every iteration resolves the target, opens a fresh connection and runs a
//! new [`Initiator`]. A failed exchange only ends that iteration; a failed
//! name lookup ends the run.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::config::ClientArgs;
use crate::error::FatalError;
use crate::protocols::echo::Initiator;

/// Outcome counts for a bounded run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub completed: u64,
    pub failed: u64,
}

/// Run exchanges until `args.iterations` is reached, or forever.
pub async fn run(args: &ClientArgs) -> Result<ClientStats, FatalError> {
    let mut stats = ClientStats::default();

    info!(
        host = %args.host,
        port = args.port,
        payload_size = args.payload_size.get(),
        iterations = ?args.iterations,
        "Starting client"
    );

    let mut first = true;
    loop {
        if let Some(limit) = args.iterations {
            if stats.completed + stats.failed >= limit {
                break;
            }
        }

        if !first && !args.retry_delay().is_zero() {
            tokio::time::sleep(args.retry_delay()).await;
        }
        first = false;

        let addr = resolve(&args.host, args.port).await?;

        let mut initiator = Initiator::new(args.payload_size);
        match initiator.run(addr, args.io_timeout()).await {
            Ok(summary) => {
                stats.completed += 1;
                debug!(
                    peer = %addr,
                    sent = summary.sent,
                    received = summary.received,
                    "Exchange complete"
                );
            }
            Err(e) => {
                stats.failed += 1;
                warn!(peer = %addr, error = %e, "Exchange failed");
            }
        }
    }

    info!(
        completed = stats.completed,
        failed = stats.failed,
        "Client finished"
    );
    Ok(stats)
}

/// Map `host:port` to the first address returned by the system resolver.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, FatalError> {
    let resolution_error = |source| FatalError::Resolution {
        host: host.to_string(),
        source,
    };

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(resolution_error)?;
    addrs.next().ok_or_else(|| {
        resolution_error(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no addresses returned",
        ))
    })
}
