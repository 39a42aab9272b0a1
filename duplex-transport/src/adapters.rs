//! End-to-end connection establishment: raw transport dial/accept, mutual
//! auth (`crate::handshake`), and the greeting exchange (`crate::greeting`),
//! composed into one [`FrameTransport`] plus the learned remote `PeerId`.
//!
//! One function per scheme, matching spec.md §6's three endpoint kinds.

use duplex_core::endpoint::Endpoint;
use duplex_core::id::PeerId;
use duplex_core::inproc::InprocRegistry;

use crate::frame_transport::FrameTransport;
use crate::greeting::{self, GreetingError};
use crate::handshake::{self, HandshakeError, StaticIdentity};
use crate::message_stream::{self, InprocTransport};

/// Everything a successful dial/accept produces: the ready-to-drive
/// [`FrameTransport`] plus the remote's learned identity.
pub struct EstablishedConnection<T> {
    pub transport: FrameTransport<T>,
    pub remote_peer_id: PeerId,
}

/// Errors raised while establishing a connection, before `Connection`
/// construction proper — these map onto `DuplexError::Io`/`Auth`/`Timeout`.
#[derive(Debug, thiserror::Error)]
pub enum EstablishError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Greeting(#[from] GreetingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

async fn finish<T>(
    raw: T,
    identity: &StaticIdentity,
    authorized_keys: Option<&[[u8; 32]]>,
    local_peer_id: PeerId,
) -> Result<EstablishedConnection<T>, EstablishError>
where
    T: message_stream::MessageTransport,
{
    let outcome = handshake::perform(raw, identity, authorized_keys, Some(handshake::HANDSHAKE_TIMEOUT)).await?;
    let mut transport = FrameTransport::new(outcome.transport);
    let remote_peer_id = greeting::exchange(&mut EncryptedAdapter(&mut transport), local_peer_id, Some(greeting::GREETING_TIMEOUT)).await?;
    Ok(EstablishedConnection { transport, remote_peer_id })
}

/// `greeting::exchange` is written against `MessageTransport`, but by the
/// time the greeting runs, frames have not started flowing yet and the
/// transport is still only usable at the raw encrypted-message level. This
/// adapter lets the greeting ride the same `FrameTransport` plumbing
/// without `FrameTransport` itself needing a raw-message escape hatch in
/// its public API.
struct EncryptedAdapter<'a, T>(&'a mut FrameTransport<T>);

#[async_trait::async_trait(?Send)]
impl<T> message_stream::MessageTransport for EncryptedAdapter<'_, T>
where
    T: message_stream::MessageTransport,
{
    async fn send_message(&mut self, body: bytes::Bytes) -> std::io::Result<()> {
        self.0.send_raw(body).await
    }

    async fn recv_message(&mut self) -> std::io::Result<Option<bytes::Bytes>> {
        self.0.recv_raw().await
    }
}

/// Dial a `tcp://` endpoint.
pub async fn dial_tcp(
    addr: std::net::SocketAddr,
    identity: &StaticIdentity,
    authorized_keys: Option<&[[u8; 32]]>,
    local_peer_id: PeerId,
) -> Result<EstablishedConnection<message_stream::TcpTransport>, EstablishError> {
    let raw = message_stream::dial_tcp(addr).await?;
    finish(raw, identity, authorized_keys, local_peer_id).await
}

/// Accept one already-connected TCP stream (post `listener.accept()`).
pub async fn accept_tcp(
    stream: compio::net::TcpStream,
    identity: &StaticIdentity,
    authorized_keys: Option<&[[u8; 32]]>,
    local_peer_id: PeerId,
) -> Result<EstablishedConnection<message_stream::TcpTransport>, EstablishError> {
    let raw = message_stream::ByteStreamTransport::new(stream);
    finish(raw, identity, authorized_keys, local_peer_id).await
}

/// Dial a `unix://` endpoint.
#[cfg(unix)]
pub async fn dial_unix(
    path: &std::path::Path,
    identity: &StaticIdentity,
    authorized_keys: Option<&[[u8; 32]]>,
    local_peer_id: PeerId,
) -> Result<EstablishedConnection<message_stream::UnixTransport>, EstablishError> {
    let raw = message_stream::dial_unix(path).await?;
    finish(raw, identity, authorized_keys, local_peer_id).await
}

/// Accept one already-connected Unix stream.
#[cfg(unix)]
pub async fn accept_unix(
    stream: compio::net::UnixStream,
    identity: &StaticIdentity,
    authorized_keys: Option<&[[u8; 32]]>,
    local_peer_id: PeerId,
) -> Result<EstablishedConnection<message_stream::UnixTransport>, EstablishError> {
    let raw = message_stream::ByteStreamTransport::new(stream);
    finish(raw, identity, authorized_keys, local_peer_id).await
}

/// Dial an `inproc://` endpoint registered in `registry`.
pub async fn dial_inproc(
    registry: &InprocRegistry,
    name: &str,
    identity: &StaticIdentity,
    authorized_keys: Option<&[[u8; 32]]>,
    local_peer_id: PeerId,
) -> Result<EstablishedConnection<InprocTransport>, EstablishError> {
    let pipe = registry.connect(name)?;
    finish(InprocTransport::new(pipe), identity, authorized_keys, local_peer_id).await
}

/// Complete the accepting side of an `inproc://` connection, given the pipe
/// handed to the listener's accept queue.
pub async fn accept_inproc(
    pipe: duplex_core::inproc::InprocPipe,
    identity: &StaticIdentity,
    authorized_keys: Option<&[[u8; 32]]>,
    local_peer_id: PeerId,
) -> Result<EstablishedConnection<InprocTransport>, EstablishError> {
    finish(InprocTransport::new(pipe), identity, authorized_keys, local_peer_id).await
}

/// Dispatch a dial by parsed [`Endpoint`], used by `Peer::connect`. Returns
/// a dynamically typed transport since the three schemes carry distinct
/// concrete raw-stream types.
pub enum DialedTransport {
    Tcp(EstablishedConnection<message_stream::TcpTransport>),
    #[cfg(unix)]
    Unix(EstablishedConnection<message_stream::UnixTransport>),
    Inproc(EstablishedConnection<InprocTransport>),
}

pub async fn dial(
    endpoint: &Endpoint,
    identity: &StaticIdentity,
    authorized_keys: Option<&[[u8; 32]]>,
    local_peer_id: PeerId,
    inproc_registry: &InprocRegistry,
) -> Result<DialedTransport, EstablishError> {
    match endpoint {
        Endpoint::Tcp(addr) => Ok(DialedTransport::Tcp(
            dial_tcp(*addr, identity, authorized_keys, local_peer_id).await?,
        )),
        #[cfg(unix)]
        Endpoint::Unix(path) => Ok(DialedTransport::Unix(
            dial_unix(path, identity, authorized_keys, local_peer_id).await?,
        )),
        Endpoint::Inproc(name) => Ok(DialedTransport::Inproc(
            dial_inproc(inproc_registry, name, identity, authorized_keys, local_peer_id).await?,
        )),
    }
}
