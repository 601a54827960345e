//! Open Sound Control protocol engine
//!
//! The pieces, leaves first:
//!
//! - [`proto`]: the OSC 1.0 binary codec and the message/bundle/time-tag
//!   model it round-trips
//! - [`dispatch`]: glob-pattern address matching and the handler registry
//!   with multi-match fan-out
//! - [`schedule`]: deferred dispatch of time-tagged bundles
//! - [`transport`]: datagram and streaming servers (blocking, threaded,
//!   forked, and per-connection concurrency), plus single- and
//!   multi-target clients
//!
//! The engine encodes, matches, schedules, and delivers; argument payloads
//! are opaque to it and handler semantics belong to the embedding
//! application.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod proto;
pub mod schedule;
pub mod transport;

// Re-export commonly used types
pub use config::{AppConfig, ServerMode};
pub use dispatch::{AddressSpace, Pattern};
pub use error::{Error, Result};
pub use proto::{Atom, Bundle, Message, Packet, TimeTag};
pub use schedule::Scheduler;
pub use transport::{DatagramClient, DatagramServer, MultiClient, StreamClient, StreamServer};
