//! Half-close echo protocol.
//!
//! A one-shot echo that ends with an explicit half-close handshake:
//! - Client sends a fixed-size payload (no framing, no header).
//! - Server echoes the bytes it received, then shuts down its
//!   send-direction (shutdown-WR) while still reading.
//! - Client reads the echo, shuts down its own send-direction and expects
//!   a zero-length read from the server.
//! - Anything the server receives after its shutdown-WR is logged and
//!   dropped, never echoed.
//!
//! ```text
//! client                         server
//!   | --- payload (N bytes) ------> |  Receiving
//!   | <-- echo (N bytes) ---------- |  Echoing
//!   | <-- FIN --------------------- |  HalfClosedWrite
//!   | --- FIN --------------------> |  Draining
//!   |  read() == 0                  |  read() == 0
//!   Closed                          Closed
//! ```
//!
//! Both sides release the connection on every exit path. A zero-length
//! read is how each side learns the other is done; no timeouts are needed
//! for correctness.

pub mod initiator;
pub mod session;

pub use initiator::{ExchangeSummary, Initiator, InitiatorState, DEFAULT_PAYLOAD_SIZE};
pub use session::{EchoSession, EchoState, EchoSummary, DEFAULT_BUFFER_SIZE};
