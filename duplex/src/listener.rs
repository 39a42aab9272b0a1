//! [`Listener`]: a bound endpoint accepting inbound Connections (spec.md
//! §4.4). One accept-loop task per bound endpoint; on accept error the loop
//! exits (auto-unbind).

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use flume::{Receiver, Sender};
use tracing::debug;

use duplex_core::endpoint::Endpoint;
use duplex_core::error::DuplexError;
use duplex_core::id::PeerId;
use duplex_core::inproc::InprocRegistry;
use duplex_transport::adapters::{self, EstablishedConnection, EstablishError};
use duplex_transport::handshake::StaticIdentity;
use duplex_transport::message_stream::MessageTransport;

use crate::connection;
use crate::peer::WeakPeerHandle;

/// A live listener: the accept-loop task's stop switch.
pub struct ListenerHandle {
    endpoint: Endpoint,
    close_tx: Sender<()>,
}

impl ListenerHandle {
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn stop(&self) {
        let _ = self.close_tx.try_send(());
    }
}

/// Shared context every accept-loop/completion task needs; bundled so the
/// per-scheme spawn sites stay short.
#[derive(Clone)]
struct ListenContext {
    endpoint: Endpoint,
    identity: Arc<StaticIdentity>,
    authorized_keys: Option<Arc<[[u8; 32]]>>,
    local_peer_id: PeerId,
    next_channel_id: Arc<AtomicU32>,
    peer: WeakPeerHandle,
}

/// Bind `endpoint` and start its accept loop.
pub(crate) async fn bind(
    endpoint: Endpoint,
    identity: Arc<StaticIdentity>,
    authorized_keys: Option<Arc<[[u8; 32]]>>,
    local_peer_id: PeerId,
    next_channel_id: Arc<AtomicU32>,
    inproc_registry: Arc<InprocRegistry>,
    peer: WeakPeerHandle,
) -> Result<ListenerHandle, DuplexError> {
    let (close_tx, close_rx) = flume::bounded(1);
    let ctx = ListenContext {
        endpoint: endpoint.clone(),
        identity,
        authorized_keys,
        local_peer_id,
        next_channel_id,
        peer,
    };

    match &endpoint {
        Endpoint::Tcp(addr) => {
            let listener = duplex_core::tcp::bind(*addr).await?;
            compio::runtime::spawn(accept_tcp_loop(listener, ctx, close_rx)).detach();
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let listener = duplex_core::unix::bind(path).await?;
            compio::runtime::spawn(accept_unix_loop(listener, ctx, close_rx)).detach();
        }
        Endpoint::Inproc(name) => {
            let accept_rx = inproc_registry.bind(name)?;
            compio::runtime::spawn(accept_inproc_loop(accept_rx, ctx, close_rx)).detach();
        }
    }

    Ok(ListenerHandle { endpoint, close_tx })
}

async fn accept_tcp_loop(listener: compio::net::TcpListener, ctx: ListenContext, close_rx: Receiver<()>) {
    loop {
        futures::select_biased! {
            _ = close_rx.recv_async() => break,
            accepted = duplex_core::tcp::accept(&listener) => {
                match accepted {
                    Ok(stream) => {
                        let ctx = ctx.clone();
                        compio::runtime::spawn(async move {
                            let established = adapters::accept_tcp(stream, &ctx.identity, ctx.authorized_keys.as_deref(), ctx.local_peer_id).await;
                            complete(established, &ctx).await;
                        })
                        .detach();
                    }
                    Err(err) => {
                        debug!(%err, endpoint = %ctx.endpoint, "listener accept failed, auto-unbinding");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
async fn accept_unix_loop(listener: compio::net::UnixListener, ctx: ListenContext, close_rx: Receiver<()>) {
    loop {
        futures::select_biased! {
            _ = close_rx.recv_async() => break,
            accepted = duplex_core::unix::accept(&listener) => {
                match accepted {
                    Ok(stream) => {
                        let ctx = ctx.clone();
                        compio::runtime::spawn(async move {
                            let established = adapters::accept_unix(stream, &ctx.identity, ctx.authorized_keys.as_deref(), ctx.local_peer_id).await;
                            complete(established, &ctx).await;
                        })
                        .detach();
                    }
                    Err(err) => {
                        debug!(%err, endpoint = %ctx.endpoint, "listener accept failed, auto-unbinding");
                        break;
                    }
                }
            }
        }
    }
}

async fn accept_inproc_loop(accept_rx: Receiver<duplex_core::inproc::InprocPipe>, ctx: ListenContext, close_rx: Receiver<()>) {
    loop {
        futures::select_biased! {
            _ = close_rx.recv_async() => break,
            accepted = accept_rx.recv_async() => {
                match accepted {
                    Ok(pipe) => {
                        let ctx = ctx.clone();
                        compio::runtime::spawn(async move {
                            let established = adapters::accept_inproc(pipe, &ctx.identity, ctx.authorized_keys.as_deref(), ctx.local_peer_id).await;
                            complete(established, &ctx).await;
                        })
                        .detach();
                    }
                    Err(_closed) => break,
                }
            }
        }
    }
}

async fn complete<T>(established: Result<EstablishedConnection<T>, EstablishError>, ctx: &ListenContext)
where
    T: MessageTransport + 'static,
{
    match established {
        Ok(established) => {
            let connection = connection::spawn(established, ctx.endpoint.clone(), Arc::clone(&ctx.next_channel_id), ctx.peer.clone());
            ctx.peer.register_inbound_connection(connection).await;
        }
        Err(err) => {
            debug!(%err, endpoint = %ctx.endpoint, "inbound handshake/greeting failed");
        }
    }
}
