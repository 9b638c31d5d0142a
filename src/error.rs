//! Error types.
//!
//! Two tiers:
//! - [`SessionError`]: local to one connection. It ends that session (or
//!   client attempt), the connection is released, and the caller logs it.
//! - [`FatalError`]: no further progress is possible and the process exits.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Per-connection failure.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Establishing the connection failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer did not follow the half-close handshake.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),

    /// The transport accepted fewer bytes than requested and would not take more.
    #[error("partial write: {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },

    /// A single I/O operation exceeded the configured deadline.
    #[error("i/o timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was already released.
    #[error("connection already closed")]
    Closed,

    /// A write was attempted after the send-direction was shut down.
    #[error("write attempted after shutdown-WR")]
    WriteAfterShutdown,
}

/// Ways a peer can break the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// The peer closed where the echo was expected.
    #[error("peer closed before echoing")]
    MissingEcho,

    /// The echo does not match what was sent.
    #[error("echo differs from payload ({received} bytes received, {expected} expected)")]
    EchoMismatch { received: usize, expected: usize },

    /// The peer sent data where its close was expected.
    #[error("{0} unexpected bytes after shutdown-WR")]
    TrailingData(usize),
}

/// Process-terminating failure.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The listening address is invalid or already in use.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A socket could not be created or configured.
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    /// Name lookup failed.
    #[error("failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The listening socket itself became unusable.
    #[error("listening socket failed: {0}")]
    Listener(#[source] io::Error),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
