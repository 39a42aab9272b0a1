//! [`MessageTransport`]: the minimum contract a `Connection` drives (spec.md
//! §1/§6) — "send one opaque message, receive one opaque message" — plus the
//! concrete adapters that implement it over TCP, Unix, and in-process pipes.
//!
//! Every message handed across this trait is, at this layer, an opaque byte
//! string: either an encrypted wire message (pre-handshake framing) or a
//! plaintext encoded [`crate::frame::Frame`] body (post-handshake, once
//! `crate::session::EncryptedTransport` is unwrapped). The distinction is
//! the caller's concern, not this trait's.

use std::io;
use std::path::Path;

use bytes::Bytes;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use compio::net::{TcpStream, UnixStream};

use duplex_core::inproc::InprocPipe;

use crate::codec::{frame_with_length_prefix, LengthPrefixedReassembler};

/// One length-delimited, bidirectional message stream.
#[async_trait::async_trait(?Send)]
pub trait MessageTransport {
    /// Send one message, whole.
    async fn send_message(&mut self, body: Bytes) -> io::Result<()>;

    /// Receive the next message, or `None` on clean EOF.
    async fn recv_message(&mut self) -> io::Result<Option<Bytes>>;
}

/// Adapts any `AsyncRead + AsyncWrite` byte stream (TCP, Unix) into a
/// [`MessageTransport`] by applying the 4-byte length prefix from
/// `crate::codec`.
pub struct ByteStreamTransport<S> {
    inner: S,
    reassembler: LengthPrefixedReassembler,
    read_chunk: usize,
}

impl<S> ByteStreamTransport<S> {
    const DEFAULT_READ_CHUNK: usize = 64 * 1024;

    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reassembler: LengthPrefixedReassembler::new(),
            read_chunk: Self::DEFAULT_READ_CHUNK,
        }
    }
}

#[async_trait::async_trait(?Send)]
impl<S> MessageTransport for ByteStreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn send_message(&mut self, body: Bytes) -> io::Result<()> {
        let wire = frame_with_length_prefix(&body);
        let compio::buf::BufResult(result, _) = self.inner.write_all(wire.to_vec()).await;
        result
    }

    async fn recv_message(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match self
                .reassembler
                .next_message()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            {
                Some(msg) => return Ok(Some(msg)),
                None => {
                    let buf = vec![0u8; self.read_chunk];
                    let compio::buf::BufResult(result, buf) = self.inner.read(buf).await;
                    let n = result?;
                    if n == 0 {
                        return Ok(None);
                    }
                    self.reassembler.push(Bytes::copy_from_slice(&buf[..n]));
                }
            }
        }
    }
}

/// TCP-backed transport.
pub type TcpTransport = ByteStreamTransport<TcpStream>;

/// Unix-domain-socket-backed transport.
#[cfg(unix)]
pub type UnixTransport = ByteStreamTransport<UnixStream>;

/// Dial a TCP endpoint.
pub async fn dial_tcp(addr: std::net::SocketAddr) -> io::Result<TcpTransport> {
    Ok(ByteStreamTransport::new(duplex_core::tcp::connect(addr).await?))
}

/// Dial a Unix-domain-socket endpoint.
#[cfg(unix)]
pub async fn dial_unix<P: AsRef<Path>>(path: P) -> io::Result<UnixTransport> {
    Ok(ByteStreamTransport::new(duplex_core::unix::connect(path).await?))
}

/// In-process transport: wraps the bounded-channel [`InprocPipe`] handed
/// back by `duplex_core::inproc::InprocRegistry`. Already message-oriented,
/// so no length-prefix framing is needed here.
pub struct InprocTransport {
    pipe: InprocPipe,
}

impl InprocTransport {
    #[must_use]
    pub fn new(pipe: InprocPipe) -> Self {
        Self { pipe }
    }
}

#[async_trait::async_trait(?Send)]
impl MessageTransport for InprocTransport {
    async fn send_message(&mut self, body: Bytes) -> io::Result<()> {
        self.pipe
            .tx
            .send_async(body)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "inproc peer dropped"))
    }

    async fn recv_message(&mut self) -> io::Result<Option<Bytes>> {
        match self.pipe.rx.recv_async().await {
            Ok(msg) => Ok(Some(msg)),
            Err(_closed) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_core::inproc::InprocRegistry;

    #[compio::test]
    async fn tcp_transport_round_trips_a_message() {
        let listener = duplex_core::tcp::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_handle = compio::runtime::spawn(async move {
            let stream = duplex_core::tcp::accept(&listener).await.unwrap();
            let mut transport = ByteStreamTransport::new(stream);
            transport.recv_message().await.unwrap()
        });

        let mut client = dial_tcp(addr).await.unwrap();
        client.send_message(Bytes::from_static(b"hello")).await.unwrap();

        let received = accept_handle.await.unwrap();
        assert_eq!(received, Some(Bytes::from_static(b"hello")));
    }

    #[compio::test]
    async fn inproc_transport_round_trips_a_message() {
        let registry = InprocRegistry::new();
        let accept_rx = registry.bind("ep").unwrap();

        let client_pipe = registry.connect("ep").unwrap();
        let server_pipe = accept_rx.recv_async().await.unwrap();

        let mut client = InprocTransport::new(client_pipe);
        let mut server = InprocTransport::new(server_pipe);

        client.send_message(Bytes::from_static(b"ping")).await.unwrap();
        let got = server.recv_message().await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"ping")));
    }

    #[compio::test]
    async fn inproc_transport_returns_none_after_peer_drop() {
        let registry = InprocRegistry::new();
        let accept_rx = registry.bind("ep2").unwrap();
        let client_pipe = registry.connect("ep2").unwrap();
        let server_pipe = accept_rx.recv_async().await.unwrap();
        drop(client_pipe);

        let mut server = InprocTransport::new(server_pipe);
        assert_eq!(server.recv_message().await.unwrap(), None);
    }
}
