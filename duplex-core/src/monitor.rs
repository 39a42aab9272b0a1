//! Diagnostic event monitoring.
//!
//! A lightweight, optional companion to the `tracing` log lines the rest of
//! the crate emits: a programmatic feed of the same lifecycle events, for
//! callers that want to observe them without scraping logs.

use crate::endpoint::Endpoint;
use std::fmt;

/// Peer/Connection lifecycle events.
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    /// A Connection was established to a remote peer.
    Connected(Endpoint),
    /// A Connection to a remote peer was lost or closed.
    Disconnected(Endpoint),
    /// A Listener successfully bound its endpoint.
    Bound(Endpoint),
    /// Binding a Listener failed.
    BindFailed { endpoint: Endpoint, reason: String },
    /// A dial attempt failed.
    ConnectFailed { endpoint: Endpoint, reason: String },
    /// A Listener accepted an inbound connection.
    Accepted(Endpoint),
    /// A frame referencing an unknown channel id was dropped.
    FrameDropped { endpoint: Endpoint, channel_id: u32 },
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(ep) => write!(f, "connected to {ep}"),
            Self::Disconnected(ep) => write!(f, "disconnected from {ep}"),
            Self::Bound(ep) => write!(f, "bound to {ep}"),
            Self::BindFailed { endpoint, reason } => write!(f, "bind failed for {endpoint}: {reason}"),
            Self::ConnectFailed { endpoint, reason } => write!(f, "connect failed for {endpoint}: {reason}"),
            Self::Accepted(ep) => write!(f, "accepted connection on {ep}"),
            Self::FrameDropped { endpoint, channel_id } => {
                write!(f, "dropped frame for unknown channel {channel_id} on {endpoint}")
            }
        }
    }
}

/// Handle for receiving diagnostic events.
pub type DiagnosticMonitor = flume::Receiver<DiagnosticEvent>;
/// Sender used by transport adapters to emit diagnostic events.
pub type DiagnosticSender = flume::Sender<DiagnosticEvent>;

/// Create a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (DiagnosticSender, DiagnosticMonitor) {
    flume::unbounded()
}
