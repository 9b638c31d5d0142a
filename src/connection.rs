//! Connection wrapper tracking the two directions of a stream.
//!
//! A connection's send-direction is shut down at most once, nothing is
//! written after that, and nothing is read or written after the
//! connection is closed. `close` is idempotent.

use std::future::Future;
use std::io;
use std::net::Shutdown;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::SessionError;

/// A bidirectional byte stream whose directions can be closed independently.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Shut down both directions at the socket level.
    ///
    /// The stream is dropped right after, so implementations without a
    /// socket-level notion of shutdown may do nothing.
    fn shutdown_both(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn shutdown_both(&mut self) -> io::Result<()> {
        SockRef::from(&*self).shutdown(Shutdown::Both)
    }
}

/// Open/closed state of each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directions {
    pub read_open: bool,
    pub write_open: bool,
}

impl Directions {
    /// Both directions closed.
    pub fn is_closed(&self) -> bool {
        !self.read_open && !self.write_open
    }
}

/// A connection owned by exactly one session.
#[derive(Debug)]
pub struct Connection<S> {
    /// `None` once closed.
    stream: Option<S>,
    write_open: bool,
    io_timeout: Option<Duration>,
}

impl<S: Transport> Connection<S> {
    /// Wrap a freshly connected stream with both directions open.
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            write_open: true,
            io_timeout: None,
        }
    }

    /// Bound every subsequent read and write by `timeout`.
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed its send-direction.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
        let timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(SessionError::Closed)?;
        bounded(timeout, stream.read(buf)).await
    }

    /// Write every byte of `buf`.
    ///
    /// A write that makes no progress before `buf` is exhausted is a
    /// [`SessionError::PartialWrite`]; it is not retried.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), SessionError> {
        if !self.write_open {
            return Err(SessionError::WriteAfterShutdown);
        }
        let timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(SessionError::Closed)?;

        let mut written = 0;
        while written < buf.len() {
            let n = bounded(timeout, stream.write(&buf[written..])).await?;
            if n == 0 {
                return Err(SessionError::PartialWrite {
                    written,
                    expected: buf.len(),
                });
            }
            written += n;
        }
        bounded(timeout, stream.flush()).await
    }

    /// Close the send-direction, leaving the receive-direction open.
    ///
    /// Only the first call reaches the transport.
    pub async fn shutdown_write(&mut self) -> Result<(), SessionError> {
        if !self.write_open {
            return Ok(());
        }
        let timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(SessionError::Closed)?;
        // Mark first: a failed shutdown still forbids further writes.
        self.write_open = false;
        bounded(timeout, stream.shutdown()).await?;
        trace!("shutdown-WR");
        Ok(())
    }

    /// Close both directions and release the stream. Idempotent.
    pub fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        self.write_open = false;
        // The peer may already be gone; the stream is released either way.
        if let Err(e) = stream.shutdown_both() {
            trace!(error = %e, "shutdown-RDWR failed");
        }
        drop(stream);
        trace!("connection released");
    }

    /// Current direction state.
    pub fn directions(&self) -> Directions {
        Directions {
            read_open: self.stream.is_some(),
            write_open: self.stream.is_some() && self.write_open,
        }
    }

    /// Both directions closed and the stream released.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Borrow the underlying stream, if still open.
    pub fn get_ref(&self) -> Option<&S> {
        self.stream.as_ref()
    }
}

/// Run one I/O operation under an optional deadline.
async fn bounded<T>(
    timeout: Option<Duration>,
    op: impl Future<Output = io::Result<T>>,
) -> Result<T, SessionError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, op).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::Timeout(limit)),
        },
        None => op.await.map_err(SessionError::from),
    }
}
