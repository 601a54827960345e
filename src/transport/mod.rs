//! Transports: datagram and streaming servers, clients, fan-out
//!
//! ## Protocol architecture
//!
//! - **UDP datagram**: one OSC packet per datagram. The server receives a
//!   packet per wake, decodes it, and drives it through the scheduler and
//!   dispatcher under a pluggable [`strategy::ConcurrencyStrategy`].
//! - **TCP streaming**: OSC packets framed with a 4-byte big-endian length
//!   prefix (the same shape as bundle-element framing). Each accepted
//!   connection gets its own reader thread and may carry connection-scoped
//!   handlers; the server keeps a live-connection registry for broadcast
//!   and graceful shutdown.
//!
//! A decode failure or connection reset affects only that packet or
//! connection; the loops log it and keep serving.

pub mod client;
pub mod convention;
pub mod datagram;
pub mod strategy;
pub mod stream;
pub mod target;

pub use client::{DatagramClient, StreamClient};
pub use datagram::DatagramServer;
pub use strategy::{Blocking, ConcurrencyStrategy, Threaded};
pub use stream::StreamServer;
pub use target::{MultiClient, Target};

#[cfg(unix)]
pub use strategy::Forked;

/// Largest datagram the servers and clients will handle. UDP over IPv4
/// caps practical payloads at 65507 bytes.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
