//! Duplex Core
//!
//! Transport-agnostic building blocks shared by the duplex wire layer and
//! the public `Peer`/`Connection`/`Channel` API:
//!
//! - stable peer identity (`id`)
//! - the error taxonomy every public call surfaces (`error`)
//! - endpoint URI parsing (`endpoint`)
//! - peer configuration (`options`)
//! - reconnect backoff policies (`reconnect`)
//! - zero-copy incremental byte buffering (`buffer`)
//! - timeout helpers over `compio` I/O (`timeout`)
//! - TCP/Unix socket helpers (`tcp`, `unix`)
//! - the in-process transport registry (`inproc`)
//! - key-material loading for mutual auth (`auth`)
//! - a diagnostic event stream (`monitor`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod id;
pub mod inproc;
pub mod monitor;
pub mod options;
pub mod reconnect;
pub mod tcp;
pub mod timeout;
#[cfg(unix)]
pub mod unix;

pub mod prelude {
    pub use crate::endpoint::{Endpoint, EndpointError};
    pub use crate::error::{DuplexError, Result};
    pub use crate::id::PeerId;
    pub use crate::options::PeerOptions;
}
