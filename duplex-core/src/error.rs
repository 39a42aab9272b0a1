//! The error taxonomy surfaced by `Peer`, `Connection`, and `Channel`.

use std::io;
use thiserror::Error;

/// The error string an initiator sends to request cooperative early
/// termination of a server-side stream.
pub const CLOSE_STREAM_SENTINEL: &str = "CloseStream";

/// The error type returned by every fallible duplex operation.
///
/// `Clone` so a [`Channel`](https://docs.rs/duplex/latest/duplex/struct.Channel.html)'s
/// terminal error can be read back by `error()` without consuming it; the
/// underlying `std::io::Error` (itself not `Clone`) is captured as its
/// rendered message at the point this type is constructed from one.
#[derive(Error, Debug, Clone)]
pub enum DuplexError {
    /// Operation invalid in the current peer/channel state (shut down,
    /// already closed).
    #[error("invalid state: {0}")]
    State(String),

    /// Endpoint, listener, connection, or remote peer not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed endpoint URI, unknown scheme, or invalid option.
    #[error("config error: {0}")]
    Config(String),

    /// Key load failed or the mutual-auth handshake was rejected.
    #[error("auth error: {0}")]
    Auth(String),

    /// The underlying transport failed.
    #[error("io error: {0}")]
    Io(String),

    /// The channel is closed, locally or by the remote, without a specific
    /// error.
    #[error("channel closed")]
    Closed,

    /// The remote side sent an error-frame; the string is carried verbatim.
    #[error("remote error: {0}")]
    Remote(String),

    /// Greeting, dial, or per-attempt operation exceeded its budget.
    #[error("timed out")]
    Timeout,
}

impl From<io::Error> for DuplexError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias used throughout the duplex crates.
pub type Result<T> = std::result::Result<T, DuplexError>;

impl DuplexError {
    /// Build a [`DuplexError::State`] error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Build a [`DuplexError::NotFound`] error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Build a [`DuplexError::Config`] error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`DuplexError::Auth`] error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Build a [`DuplexError::Remote`] error from a wire error-frame.
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Whether this error is scoped to one Connection (the Peer and its
    /// other Connections remain usable) as opposed to a terminal local-state
    /// error.
    #[must_use]
    pub fn is_connection_scoped(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout)
    }
}
