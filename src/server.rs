//! Connection acceptor for the echo server.
//!
//! Binds a reusable listening socket, accepts connections in a loop and
//! hands each one to a fresh [`EchoSession`].

use crate::config::{Config, Dispatch};
use crate::connection::Connection;
use crate::error::FatalError;
use crate::protocols::echo::EchoSession;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Pause after a non-fatal accept failure (e.g. EMFILE) before retrying.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Settings every session gets.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub buffer_size: usize,
    pub io_timeout: Option<Duration>,
}

/// Listening endpoint plus dispatch policy.
pub struct Acceptor {
    listener: TcpListener,
    settings: SessionSettings,
    dispatch: Dispatch,
    connection_limit: Arc<Semaphore>,
}

impl Acceptor {
    /// Bind the configured address. Must be called within a Tokio runtime.
    pub fn bind(config: &Config) -> Result<Self, FatalError> {
        let listener = listen(&config.listen, config.backlog)?;
        info!(address = %config.listen, backlog = config.backlog, "Socket listening");

        Ok(Acceptor {
            listener,
            settings: SessionSettings {
                buffer_size: config.buffer_size,
                io_timeout: config.io_timeout,
            },
            dispatch: config.dispatch,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listening socket fails.
    ///
    /// Individual accept failures are logged and skipped. Only returns
    /// when the listening socket itself is no longer usable.
    pub async fn serve(self) -> Result<(), FatalError> {
        loop {
            // Wait for a connection slot
            let permit = self
                .connection_limit
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| {
                    FatalError::Listener(io::Error::new(
                        io::ErrorKind::Other,
                        "connection limiter closed",
                    ))
                })?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Socket accepted");
                    match self.dispatch {
                        Dispatch::Sequential => {
                            handle_connection(stream, peer, self.settings).await;
                            drop(permit);
                        }
                        Dispatch::Concurrent => {
                            let settings = self.settings;
                            tokio::spawn(async move {
                                handle_connection(stream, peer, settings).await;
                                drop(permit);
                            });
                        }
                    }
                }
                Err(e) if listener_is_broken(&e) => {
                    error!(error = %e, "Listening socket failed");
                    return Err(FatalError::Listener(e));
                }
                Err(e) => {
                    error!(error = %e, "Unable to accept connection");
                    drop(permit);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

/// Run one echo session and log how it ended.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, settings: SessionSettings) {
    let conn = Connection::new(stream).with_io_timeout(settings.io_timeout);
    let mut session = EchoSession::new(conn, settings.buffer_size);

    match session.run().await {
        Ok(summary) => {
            info!(
                peer = %peer,
                echoed = summary.echoed,
                discarded = summary.discarded,
                "Connection closed"
            );
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "Session failed, connection closed");
        }
    }
}

/// Errors from `accept` that mean the listening socket is gone.
fn listener_is_broken(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EBADF) | Some(libc::EINVAL) | Some(libc::ENOTSOCK)
    )
}

/// Create a TCP listener with SO_REUSEADDR so restarts don't trip over
/// lingering sockets. IPv6 sockets also accept IPv4 clients.
fn listen(address: &str, backlog: i32) -> Result<TcpListener, FatalError> {
    let bind_error = |source| FatalError::Bind {
        addr: address.to_string(),
        source,
    };

    let addr: SocketAddr = address
        .parse()
        .map_err(|e| bind_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(FatalError::Socket)?;

    socket.set_reuse_address(true).map_err(FatalError::Socket)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false).map_err(FatalError::Socket)?;
    }
    socket.set_nonblocking(true).map_err(FatalError::Socket)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.listen(backlog).map_err(bind_error)?;

    TcpListener::from_std(socket.into()).map_err(FatalError::Socket)
}
