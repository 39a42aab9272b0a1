//! [`FrameTransport`]: the final layer `Connection` actually drives — sends
//! and receives whole [`Frame`]s over an [`EncryptedTransport`].

use std::io;

use crate::codec::{decode_frame, encode_frame, CodecError};
use crate::frame::Frame;
use crate::message_stream::MessageTransport;
use crate::session::EncryptedTransport;

/// A ready-to-use, authenticated, encrypted channel multiplexer transport.
pub struct FrameTransport<T> {
    encrypted: EncryptedTransport<T>,
}

impl<T> FrameTransport<T>
where
    T: MessageTransport,
{
    #[must_use]
    pub fn new(encrypted: EncryptedTransport<T>) -> Self {
        Self { encrypted }
    }

    /// Send one frame.
    pub async fn send_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.encrypted.send_message(encode_frame(frame)).await
    }

    /// Receive the next frame, or `None` on clean connection close.
    pub async fn recv_frame(&mut self) -> io::Result<Option<Frame>> {
        let Some(body) = self.encrypted.recv_message().await? else {
            return Ok(None);
        };
        decode_frame(&body)
            .map(Some)
            .map_err(|e: CodecError| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Send a raw (pre-frame-codec) message. Used only by the greeting
    /// exchange, which runs before any `Frame` has meaning on this
    /// transport.
    pub(crate) async fn send_raw(&mut self, body: bytes::Bytes) -> io::Result<()> {
        self.encrypted.send_message(body).await
    }

    /// Receive a raw (pre-frame-codec) message. See [`Self::send_raw`].
    pub(crate) async fn recv_raw(&mut self) -> io::Result<Option<bytes::Bytes>> {
        self.encrypted.recv_message().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_stream::InprocTransport;
    use bytes::Bytes;
    use chacha20poly1305::{aead::OsRng, ChaCha20Poly1305, KeyInit};
    use duplex_core::inproc::InprocRegistry;

    #[compio::test]
    async fn round_trips_frames_over_an_inproc_pipe() {
        let registry = InprocRegistry::new();
        let accept_rx = registry.bind("ft").unwrap();
        let client_pipe = registry.connect("ft").unwrap();
        let server_pipe = accept_rx.recv_async().await.unwrap();

        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let mut client = FrameTransport::new(EncryptedTransport::new(
            InprocTransport::new(client_pipe),
            ChaCha20Poly1305::new(&key),
        ));
        let mut server = FrameTransport::new(EncryptedTransport::new(
            InprocTransport::new(server_pipe),
            ChaCha20Poly1305::new(&key),
        ));

        let open = Frame::open(1, "echo", vec![]);
        client.send_frame(&open).await.unwrap();
        let received = server.recv_frame().await.unwrap().unwrap();
        assert_eq!(received.channel_id, 1);
        assert_eq!(received.service.as_deref(), Some("echo"));

        let data = Frame::data(1, Bytes::from_static(b"hi"), true);
        server.send_frame(&data).await.unwrap();
        let received = client.recv_frame().await.unwrap().unwrap();
        assert_eq!(received.payload.as_ref(), b"hi");
        assert!(received.last);
    }
}
