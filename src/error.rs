//! Error types for the OSC engine

use std::net::SocketAddr;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// OSC engine error types
///
/// Three families, with different recovery expectations:
/// - Malformed packets (truncated buffer, bad length prefix, unknown type
///   tag, bad address) are recoverable per-packet and never take down a
///   receive loop. See [`Error::is_malformed`].
/// - Handler failures are caught at the dispatch boundary and converted to
///   error replies; they never propagate out of dispatch.
/// - Transport failures (bind/connect/spawn) are fatal to the operation
///   that requested them, but not to already-running peers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet buffer ended before a complete value
    #[error("truncated packet: need {needed} more bytes, {remaining} left")]
    Truncated {
        /// Bytes required to finish the current value
        needed: usize,
        /// Bytes actually remaining in the buffer
        remaining: usize,
    },

    /// Element length prefix points past the end of the buffer
    #[error("bad length prefix: {declared} bytes declared, {remaining} remaining")]
    BadLengthPrefix {
        /// Declared element size
        declared: usize,
        /// Bytes actually remaining
        remaining: usize,
    },

    /// Unrecognized character in a type tag string
    #[error("unknown type tag '{0}'")]
    UnknownTypeTag(char),

    /// Address does not start with '/' or is otherwise unusable
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Packet violates the OSC layout in some other way
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Address pattern failed to compile
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern string
        pattern: String,
        /// What was wrong with it
        reason: &'static str,
    },

    /// A registered handler returned a failure
    #[error("handler for {addr} failed: {reason}")]
    Handler {
        /// Address the failing handler was invoked for
        addr: String,
        /// Handler-supplied failure description
        reason: String,
    },

    /// Unregister target was never registered
    #[error("no handler registered for {0}")]
    NoSuchHandler(String),

    /// Unsubscribe for a client that was never subscribed
    #[error("client {0} is not subscribed")]
    NotSubscribed(SocketAddr),

    /// Worker thread or process could not be spawned
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// In-flight work did not finish within the shutdown deadline
    #[error("shutdown timed out with {pending} unit(s) still in flight")]
    ShutdownTimeout {
        /// Units still running when the deadline expired
        pending: usize,
    },

    /// Stream frame exceeds the configured cap
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    OversizedFrame {
        /// Declared frame size
        size: usize,
        /// Maximum accepted frame size
        limit: usize,
    },

    /// Target specification string could not be parsed
    #[error("invalid target spec: {0}")]
    InvalidTarget(String),

    /// Operation not supported on this platform or configuration
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// TOML parse error
    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("config serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// True for the malformed-packet family: errors a receive loop should
    /// log and survive rather than propagate.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::Truncated { .. }
                | Error::BadLengthPrefix { .. }
                | Error::UnknownTypeTag(_)
                | Error::InvalidAddress(_)
                | Error::Malformed(_)
        )
    }
}
