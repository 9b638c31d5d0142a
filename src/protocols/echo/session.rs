//! Server side of the half-close echo: one session per accepted connection.

use bytes::BytesMut;
use tracing::{info, trace};

use crate::connection::{Connection, Transport};
use crate::error::SessionError;

/// Default receive buffer size for the server.
pub const DEFAULT_BUFFER_SIZE: usize = 128;

/// Current state of an echo session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoState {
    /// Waiting for the request.
    Receiving,
    /// Writing the received bytes back.
    Echoing,
    /// Send-direction closed, nothing read since.
    HalfClosedWrite,
    /// Discarding inbound data until the peer closes.
    Draining,
    /// Terminal. The connection is released.
    Closed,
    /// A failure was hit; always followed by `Closed`.
    Error,
}

/// Totals for a session that closed cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoSummary {
    /// Bytes echoed back (0 if the peer closed without sending).
    pub echoed: usize,
    /// Bytes received after shutdown-WR and dropped.
    pub discarded: usize,
}

/// Receive, echo once, shut down writing, drain, close.
pub struct EchoSession<S: Transport> {
    conn: Connection<S>,
    state: EchoState,
    buffer: BytesMut,
    /// Bytes held in `buffer` awaiting echo.
    received: usize,
    peer_half_closed: bool,
}

impl<S: Transport> EchoSession<S> {
    /// Create a session with a zeroed buffer of `buffer_size` bytes.
    pub fn new(conn: Connection<S>, buffer_size: usize) -> Self {
        Self {
            conn,
            state: EchoState::Receiving,
            buffer: BytesMut::zeroed(buffer_size),
            received: 0,
            peer_half_closed: false,
        }
    }

    /// Drive the session to `Closed`.
    ///
    /// The connection is released on every path, including errors.
    pub async fn run(&mut self) -> Result<EchoSummary, SessionError> {
        let result = self.drive().await;
        if result.is_err() {
            self.transition(EchoState::Error);
        }
        self.conn.close();
        self.transition(EchoState::Closed);
        result
    }

    async fn drive(&mut self) -> Result<EchoSummary, SessionError> {
        let mut summary = EchoSummary::default();

        loop {
            match self.state {
                EchoState::Receiving => {
                    let n = self.conn.read(&mut self.buffer).await?;
                    if n == 0 {
                        trace!("peer closed before sending");
                        self.peer_half_closed = true;
                        return Ok(summary);
                    }
                    trace!(bytes = n, "received");
                    self.received = n;
                    self.transition(EchoState::Echoing);
                }
                EchoState::Echoing => {
                    self.conn.write_all(&self.buffer[..self.received]).await?;
                    summary.echoed = self.received;
                    self.conn.shutdown_write().await?;
                    self.transition(EchoState::HalfClosedWrite);
                }
                EchoState::HalfClosedWrite => {
                    self.transition(EchoState::Draining);
                }
                EchoState::Draining => {
                    let n = self.conn.read(&mut self.buffer).await?;
                    if n == 0 {
                        self.peer_half_closed = true;
                        return Ok(summary);
                    }
                    info!(bytes = n, "ignore data after shutdown-WR");
                    summary.discarded += n;
                }
                EchoState::Closed | EchoState::Error => return Err(SessionError::Closed),
            }
        }
    }

    fn transition(&mut self, next: EchoState) {
        trace!(from = ?self.state, to = ?next, "echo session");
        self.state = next;
    }

    /// Current state.
    pub fn state(&self) -> EchoState {
        self.state
    }

    /// The peer's send-direction has been observed closed.
    pub fn peer_half_closed(&self) -> bool {
        self.peer_half_closed
    }

    /// The connection driven by this session.
    pub fn connection(&self) -> &Connection<S> {
        &self.conn
    }
}
