//! Client side of the half-close echo.
//!
//! One initiator drives one attempt:
//! connect, send, receive echo, shutdown-WR, await the peer's close, close.
//! The peer's half-close is verified, not assumed: data where a zero-length
//! read was expected is a [`Violation::TrailingData`].

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tracing::trace;

use crate::connection::{Connection, Transport};
use crate::error::{SessionError, Violation};

/// Default payload size for the client.
pub const DEFAULT_PAYLOAD_SIZE: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(size) => size,
    None => unreachable!(),
};

/// Current state of an initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    /// Establishing the connection.
    Connecting,
    /// Writing the payload.
    Sending,
    /// Reading the echo.
    ReceivingEcho,
    /// Closing our send-direction.
    HalfClosedWrite,
    /// Expecting end-of-stream from the peer.
    AwaitingPeerClose,
    /// Terminal. The connection is released.
    Closed,
    /// A failure was hit; always followed by `Closed`.
    Error,
}

/// Totals for a successful exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeSummary {
    pub sent: usize,
    pub received: usize,
}

/// Client-side half-close state machine.
#[derive(Debug)]
pub struct Initiator {
    state: InitiatorState,
    payload: Bytes,
    response: BytesMut,
    peer_half_closed: bool,
}

impl Initiator {
    /// An initiator sending `payload_size` zero bytes.
    pub fn new(payload_size: NonZeroUsize) -> Self {
        Self::with_payload(BytesMut::zeroed(payload_size.get()).freeze())
    }

    /// An initiator sending `payload`.
    pub fn with_payload(payload: Bytes) -> Self {
        let response = BytesMut::zeroed(payload.len());
        Self {
            state: InitiatorState::Connecting,
            payload,
            response,
            peer_half_closed: false,
        }
    }

    /// Connect to `addr` and run the exchange.
    pub async fn run(
        &mut self,
        addr: SocketAddr,
        io_timeout: Option<Duration>,
    ) -> Result<ExchangeSummary, SessionError> {
        let mut conn = self.connect(addr, io_timeout).await?;
        self.exchange(&mut conn).await
    }

    /// `Connecting`: establish a TCP connection.
    ///
    /// On failure the attempt ends in `Closed`; nothing is left open.
    pub async fn connect(
        &mut self,
        addr: SocketAddr,
        io_timeout: Option<Duration>,
    ) -> Result<Connection<TcpStream>, SessionError> {
        self.transition(InitiatorState::Connecting);

        let connecting = TcpStream::connect(addr);
        let result = match io_timeout {
            Some(limit) => match tokio::time::timeout(limit, connecting).await {
                Ok(result) => result,
                Err(_) => {
                    self.transition(InitiatorState::Error);
                    self.transition(InitiatorState::Closed);
                    return Err(SessionError::Timeout(limit));
                }
            },
            None => connecting.await,
        };

        match result {
            Ok(stream) => {
                trace!(%addr, "connected");
                Ok(Connection::new(stream).with_io_timeout(io_timeout))
            }
            Err(source) => {
                self.transition(InitiatorState::Error);
                self.transition(InitiatorState::Closed);
                Err(SessionError::Connect { addr, source })
            }
        }
    }

    /// Run `Sending` through `Closed` on an established connection.
    ///
    /// `conn` is closed on every path, including errors.
    pub async fn exchange<S: Transport>(
        &mut self,
        conn: &mut Connection<S>,
    ) -> Result<ExchangeSummary, SessionError> {
        self.transition(InitiatorState::Sending);
        let result = self.drive(conn).await;
        if result.is_err() {
            self.transition(InitiatorState::Error);
        }
        conn.close();
        self.transition(InitiatorState::Closed);
        result
    }

    async fn drive<S: Transport>(
        &mut self,
        conn: &mut Connection<S>,
    ) -> Result<ExchangeSummary, SessionError> {
        let mut received = 0;

        loop {
            match self.state {
                InitiatorState::Sending => {
                    conn.write_all(&self.payload).await?;
                    self.transition(InitiatorState::ReceivingEcho);
                }
                InitiatorState::ReceivingEcho => {
                    // Collect the full echo; TCP may deliver it in pieces.
                    while received < self.response.len() {
                        let n = conn.read(&mut self.response[received..]).await?;
                        if n == 0 {
                            self.peer_half_closed = true;
                            break;
                        }
                        received += n;
                    }
                    if received == 0 {
                        return Err(Violation::MissingEcho.into());
                    }
                    if self.response[..received] != self.payload[..] {
                        return Err(Violation::EchoMismatch {
                            received,
                            expected: self.payload.len(),
                        }
                        .into());
                    }
                    trace!(bytes = received, "echo verified");
                    self.transition(InitiatorState::HalfClosedWrite);
                }
                InitiatorState::HalfClosedWrite => {
                    conn.shutdown_write().await?;
                    self.transition(InitiatorState::AwaitingPeerClose);
                }
                InitiatorState::AwaitingPeerClose => {
                    let mut probe = [0u8; 1];
                    let n = conn.read(&mut probe).await?;
                    if n != 0 {
                        return Err(Violation::TrailingData(n).into());
                    }
                    self.peer_half_closed = true;
                    return Ok(ExchangeSummary {
                        sent: self.payload.len(),
                        received,
                    });
                }
                InitiatorState::Connecting | InitiatorState::Closed | InitiatorState::Error => {
                    return Err(SessionError::Closed);
                }
            }
        }
    }

    fn transition(&mut self, next: InitiatorState) {
        trace!(from = ?self.state, to = ?next, "initiator");
        self.state = next;
    }

    /// Current state.
    pub fn state(&self) -> InitiatorState {
        self.state
    }

    /// The peer's send-direction has been observed closed.
    pub fn peer_half_closed(&self) -> bool {
        self.peer_half_closed
    }

    /// The payload this initiator sends.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_test::{assert_err, assert_ok};

    /// Reads the payload, echoes it, then hands the stream back.
    async fn echo_once(peer: &mut DuplexStream, len: usize) {
        let mut buf = vec![0u8; len];
        peer.read_exact(&mut buf).await.unwrap();
        peer.write_all(&buf).await.unwrap();
    }

    #[tokio::test]
    async fn test_successful_exchange() {
        let (local, mut peer) = duplex(1024);
        let server = tokio::spawn(async move {
            echo_once(&mut peer, DEFAULT_PAYLOAD_SIZE.get()).await;
            // Our write side closes only after the client half-closes.
            let mut rest = Vec::new();
            peer.read_to_end(&mut rest).await.unwrap();
            peer.shutdown().await.unwrap();
            rest
        });

        let mut conn = Connection::new(local);
        let mut initiator = Initiator::new(DEFAULT_PAYLOAD_SIZE);
        let summary = assert_ok!(initiator.exchange(&mut conn).await);

        assert_eq!(
            summary,
            ExchangeSummary {
                sent: 100,
                received: 100
            }
        );
        assert_eq!(initiator.payload(), &[0u8; 100][..]);
        assert_eq!(initiator.state(), InitiatorState::Closed);
        assert!(initiator.peer_half_closed());
        assert!(conn.is_closed());
        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_echo_in_pieces() {
        let (local, mut peer) = duplex(1024);
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 6];
            peer.read_exact(&mut buf).await.unwrap();
            peer.write_all(&buf[..2]).await.unwrap();
            peer.flush().await.unwrap();
            tokio::task::yield_now().await;
            peer.write_all(&buf[2..]).await.unwrap();
            peer.shutdown().await.unwrap();
        });

        let mut conn = Connection::new(local);
        let mut initiator = Initiator::with_payload(Bytes::from_static(b"abcdef"));
        let summary = initiator.exchange(&mut conn).await.unwrap();

        assert_eq!(summary.received, 6);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_trailing_data_is_violation() {
        let (local, mut peer) = duplex(1024);
        let server = tokio::spawn(async move {
            echo_once(&mut peer, DEFAULT_PAYLOAD_SIZE.get()).await;
            // Wait for the client's shutdown-WR, then misbehave.
            let mut rest = Vec::new();
            peer.read_to_end(&mut rest).await.unwrap();
            peer.write_all(&[0xff]).await.unwrap();
            peer
        });

        let mut conn = Connection::new(local);
        let mut initiator = Initiator::new(DEFAULT_PAYLOAD_SIZE);
        let err = assert_err!(initiator.exchange(&mut conn).await);

        assert!(matches!(
            err,
            SessionError::ProtocolViolation(Violation::TrailingData(1))
        ));
        assert_eq!(initiator.state(), InitiatorState::Closed);
        assert!(!initiator.peer_half_closed());
        assert!(conn.is_closed());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_echo_is_violation() {
        let (local, mut peer) = duplex(1024);
        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; DEFAULT_PAYLOAD_SIZE.get()];
            peer.read_exact(&mut buf).await.unwrap();
            peer.shutdown().await.unwrap();
            peer
        });

        let mut conn = Connection::new(local);
        let mut initiator = Initiator::new(DEFAULT_PAYLOAD_SIZE);
        let err = initiator.exchange(&mut conn).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::ProtocolViolation(Violation::MissingEcho)
        ));
        assert_eq!(initiator.state(), InitiatorState::Closed);
        assert!(conn.is_closed());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_payload_needs_an_echo() {
        // A peer that never writes: an exchange without any echo read fails.
        let (local, mut peer) = duplex(64);
        peer.shutdown().await.unwrap();

        let mut conn = Connection::new(local);
        let mut initiator = Initiator::with_payload(Bytes::new());
        let err = initiator.exchange(&mut conn).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::ProtocolViolation(Violation::MissingEcho)
        ));
        assert_eq!(initiator.state(), InitiatorState::Closed);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_altered_echo_is_violation() {
        let (local, mut peer) = duplex(1024);
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            peer.read_exact(&mut buf).await.unwrap();
            peer.write_all(b"pong").await.unwrap();
            peer.shutdown().await.unwrap();
            peer
        });

        let mut conn = Connection::new(local);
        let mut initiator = Initiator::with_payload(Bytes::from_static(b"ping"));
        let err = initiator.exchange(&mut conn).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::ProtocolViolation(Violation::EchoMismatch {
                received: 4,
                expected: 4
            })
        ));
        assert!(conn.is_closed());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused_ends_closed() {
        // Grab a free port, then release it so nothing listens there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut initiator = Initiator::new(DEFAULT_PAYLOAD_SIZE);
        let err = initiator.run(addr, None).await.unwrap_err();

        assert!(matches!(err, SessionError::Connect { addr: a, .. } if a == addr));
        assert_eq!(initiator.state(), InitiatorState::Closed);
    }
}
