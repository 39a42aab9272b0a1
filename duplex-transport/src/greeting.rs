//! The one-round greeting exchange that reveals the remote `PeerId`
//! (spec.md §4.2/§6), performed over an already-[`EncryptedTransport`].
//!
//! The wire spec's SSH analogy has the initiator send a named global
//! request carrying `{Name: PeerId}` and requiring a reply; over this
//! crate's own framing the shape collapses to "both sides send their
//! `PeerId`, both sides read the other's back" — there is no separate
//! request/reply plumbing to ride on, so the exchange is symmetric rather
//! than initiator-first, but the budget and failure mode (5-second
//! timeout, unrecoverable `AuthError`-adjacent failure) match exactly.

use std::time::Duration;

use bytes::Bytes;
use compio::time::timeout;
use thiserror::Error;

use duplex_core::id::PeerId;

use crate::message_stream::MessageTransport;

/// The greeting budget named by spec.md §6.
pub const GREETING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum GreetingError {
    #[error("peer closed the connection during greeting")]
    Closed,
    #[error("malformed greeting payload")]
    Malformed,
    #[error("greeting timed out")]
    TimedOut,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exchange `PeerId`s over `transport`, returning the remote's.
pub async fn exchange<T>(transport: &mut T, local: PeerId, budget: Option<Duration>) -> Result<PeerId, GreetingError>
where
    T: MessageTransport,
{
    let run = async {
        transport
            .send_message(Bytes::copy_from_slice(local.as_bytes()))
            .await?;
        let remote_bytes = transport.recv_message().await?.ok_or(GreetingError::Closed)?;
        let bytes: [u8; 16] = remote_bytes
            .as_ref()
            .try_into()
            .map_err(|_| GreetingError::Malformed)?;
        Ok(PeerId::from_bytes(bytes))
    };

    match budget {
        None => run.await,
        Some(d) => match timeout(d, run).await {
            Ok(result) => result,
            Err(_elapsed) => Err(GreetingError::TimedOut),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_stream::InprocTransport;
    use duplex_core::inproc::InprocRegistry;

    #[compio::test]
    async fn both_sides_learn_the_others_peer_id() {
        let registry = InprocRegistry::new();
        let accept_rx = registry.bind("greet").unwrap();
        let client_pipe = registry.connect("greet").unwrap();
        let server_pipe = accept_rx.recv_async().await.unwrap();

        let client_id = PeerId::generate();
        let server_id = PeerId::generate();

        let mut server_transport = InprocTransport::new(server_pipe);
        let server_task = compio::runtime::spawn(async move {
            exchange(&mut server_transport, server_id, None).await.map(|remote| (remote, server_transport))
        });

        let mut client_transport = InprocTransport::new(client_pipe);
        let client_remote = exchange(&mut client_transport, client_id, None).await.unwrap();

        let (server_remote, _server_transport) = server_task.await.unwrap().unwrap();

        assert_eq!(client_remote, server_id);
        assert_eq!(server_remote, client_id);
    }
}
