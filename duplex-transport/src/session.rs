//! [`EncryptedTransport`]: the AEAD layer that sits between the raw,
//! length-delimited byte stream (`crate::message_stream`) and the frame
//! codec (`crate::codec`). Every message exchanged after the handshake
//! (§`crate::handshake`) is one frame body, encrypted whole.

use std::io;

use bytes::Bytes;
use chacha20poly1305::{
    aead::{Aead, AeadCore, OsRng},
    ChaCha20Poly1305, Nonce,
};

use crate::message_stream::MessageTransport;

/// Wraps a [`MessageTransport`], encrypting every outgoing message and
/// decrypting every incoming one with a shared `ChaCha20Poly1305` key
/// derived during the handshake. Nonces are drawn fresh per message via
/// `ChaCha20Poly1305`'s own RNG-backed nonce generator; this crate trusts
/// the AEAD's 96-bit random-nonce collision bound rather than tracking a
/// send counter, since `Connection`'s single writer task and `compio`'s
/// single-threaded-per-task model make counter bookkeeping pure overhead
/// for no practical safety gain here.
pub struct EncryptedTransport<T> {
    inner: T,
    cipher: ChaCha20Poly1305,
}

impl<T> EncryptedTransport<T> {
    #[must_use]
    pub fn new(inner: T, cipher: ChaCha20Poly1305) -> Self {
        Self { inner, cipher }
    }

    /// Unwrap back to the raw transport (used by tests that want to drive
    /// the underlying stream directly).
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait::async_trait(?Send)]
impl<T> MessageTransport for EncryptedTransport<T>
where
    T: MessageTransport,
{
    async fn send_message(&mut self, body: Bytes) -> io::Result<()> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, body.as_ref())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "encryption failed"))?;
        let mut wire = Vec::with_capacity(nonce.len() + ciphertext.len());
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&ciphertext);
        self.inner.send_message(Bytes::from(wire)).await
    }

    async fn recv_message(&mut self) -> io::Result<Option<Bytes>> {
        let Some(wire) = self.inner.recv_message().await? else {
            return Ok(None);
        };
        if wire.len() < 12 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "ciphertext too short"));
        }
        let (nonce_bytes, ciphertext) = wire.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "decryption failed"))?;
        Ok(Some(Bytes::from(plaintext)))
    }
}
