//! # Duplex
//!
//! A symmetric peer-to-peer messaging substrate. Every [`Peer`] is
//! simultaneously client and server: it may listen on multiple endpoints and
//! dial multiple remotes, and either side may initiate a multiplexed,
//! bidirectional [`Channel`] carrying a service name, headers, and an
//! ordered sequence of byte-frames.
//!
//! ## Architecture
//!
//! - **[`Frame`]** (from `duplex-transport`): the wire unit — opaque payload
//!   bytes plus optional control fields.
//! - **[`Channel`]**: a logical bidirectional stream keyed by
//!   `(origin-peer, local channel-id)`. Survives a connection drop if
//!   another connection to the same remote exists.
//! - **[`Connection`]**: one authenticated transport session, multiplexing
//!   many channels.
//! - **[`Peer`]**: the top-level handle — listeners, connections, the
//!   client-open router, and the inbound accept queue.
//!
//! `duplex-core` supplies the transport-agnostic primitives (peer identity,
//! error taxonomy, endpoint parsing, options, reconnect backoff, the
//! in-process registry); `duplex-transport` supplies the wire codec,
//! mutual-auth handshake, and greeting every `Connection` rides on.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use duplex::Peer;
//!
//! # #[compio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Peer::new().await?;
//! server.bind("tcp://127.0.0.1:9876").await?;
//!
//! let client = Peer::new().await?;
//! client.connect("tcp://127.0.0.1:9876").await?;
//!
//! let channel = client.open("echo", vec![], None).await?;
//! channel
//!     .send_frame(duplex::Frame::data(0, duplex::Bytes::from_static(b"hi"), true))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow some pedantic patterns
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::future_not_send)] // Runtime-agnostic design: compio tasks are !Send by design.
#![allow(clippy::missing_errors_doc)] // Will add gradually
#![allow(clippy::doc_markdown)] // Too many false positives

pub use bytes::Bytes;

pub use duplex_core::endpoint::{Endpoint, EndpointError};
pub use duplex_core::error::{DuplexError, Result, CLOSE_STREAM_SENTINEL};
pub use duplex_core::id::PeerId;
pub use duplex_core::inproc::InprocRegistry;
pub use duplex_core::options::{OptionKey, OptionValue, PeerOptions, CHANNEL_QUEUE_HWM};
pub use duplex_transport::frame::{Frame, FrameKind};

mod channel;
mod connection;
mod listener;
mod peer;
mod router;

pub use channel::Channel;
pub use connection::Connection;
pub use listener::ListenerHandle;
pub use peer::Peer;

/// Development helpers (benches/tests): opt-in `tracing` subscriber init.
pub mod dev_tracing;
