//! Protocol implementations.
//!
//! - `echo`: one-shot echo with a half-close handshake, server session and
//!   client initiator.

pub mod echo;
