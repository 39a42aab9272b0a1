//! Duplex Transport
//!
//! The wire: the frame codec, the mutually authenticated session, and the
//! concrete transport adapters that `duplex::Connection` drives.
//!
//! Layering, bottom to top:
//!
//! - [`frame`] — the [`frame::Frame`] wire unit.
//! - [`codec`] — positional binary encode/decode plus the length-prefix
//!   reassembler for byte-stream transports.
//! - [`message_stream`] — [`message_stream::MessageTransport`], the minimum
//!   "send one message / receive one message" contract, and its TCP/Unix/
//!   in-process adapters.
//! - [`handshake`] — X25519 mutual authentication over a
//!   [`message_stream::MessageTransport`].
//! - [`session`] — [`session::EncryptedTransport`], the `ChaCha20Poly1305`
//!   AEAD layer produced by a completed handshake.
//! - [`greeting`] — the post-handshake `PeerId` exchange.
//! - [`frame_transport`] — [`frame_transport::FrameTransport`], the final
//!   send/recv-`Frame` API.
//! - [`adapters`] — ties the above together end to end: dial/accept by
//!   endpoint scheme.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod adapters;
pub mod codec;
pub mod frame;
pub mod frame_transport;
pub mod greeting;
pub mod handshake;
pub mod message_stream;
pub mod session;

pub mod prelude {
    pub use crate::frame::{Frame, FrameKind};
    pub use crate::frame_transport::FrameTransport;
    pub use crate::handshake::StaticIdentity;
}
