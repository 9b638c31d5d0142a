//! halfclose-echo: a one-shot TCP echo with an explicit half-close handshake.
//!
//! The server echoes one request, shuts down its send-direction and drains
//! whatever else arrives until the client closes. The client checks the
//! echo, shuts down its own send-direction and requires a zero-length read
//! before closing.
//!
//! - [`server::Acceptor`]: listening socket and accept loop
//! - [`protocols::echo::EchoSession`]: server-side state machine
//! - [`protocols::echo::Initiator`]: client-side state machine
//! - [`client::run`]: client retry loop

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocols;
pub mod server;
