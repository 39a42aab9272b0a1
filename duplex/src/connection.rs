//! [`Connection`]: one authenticated, multiplexed transport session between
//! two peers (spec.md §4.2).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use flume::{Receiver, Sender};
use tracing::{debug, trace};

use duplex_core::endpoint::Endpoint;
use duplex_core::error::DuplexError;
use duplex_core::id::PeerId;
use duplex_core::options::CHANNEL_QUEUE_HWM;
use duplex_transport::adapters::EstablishedConnection;
use duplex_transport::frame::{Frame, FrameKind};
use duplex_transport::frame_transport::FrameTransport;
use duplex_transport::message_stream::MessageTransport;

use crate::channel::Channel;
use crate::peer::WeakPeerHandle;

/// One authenticated, multiplexed transport session.
///
/// Generic over the underlying raw transport only at construction time
/// ([`spawn`]); the struct itself is transport-agnostic so `Peer` can hold
/// TCP-, Unix-, and in-process-backed connections uniformly. The connection
/// is driven entirely by one background task; callers only ever touch the
/// bounded outbound queue and the channel map.
pub struct Connection {
    remote_peer_id: PeerId,
    endpoint: Endpoint,
    channels: DashMap<u32, Arc<Channel>>,
    outbound_tx: Sender<Frame>,
    close_tx: Sender<()>,
    next_channel_id: Arc<AtomicU32>,
    closed: AtomicBool,
}

impl Connection {
    #[must_use]
    pub fn remote_peer_id(&self) -> PeerId {
        self.remote_peer_id
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue a frame on the writer queue. Used both by `Channel`'s
    /// outgoing pump and by `Connection::open`'s initial open-frame.
    pub async fn send_frame_on_connection(&self, frame: &Frame) -> Result<(), DuplexError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DuplexError::Closed);
        }
        self.outbound_tx.send_async(frame.clone()).await.map_err(|_| DuplexError::Closed)
    }

    /// Install a channel in this connection's map and publish this
    /// connection to it as its (possibly new) bound connection.
    pub fn link_channel(self: &Arc<Self>, channel: Arc<Channel>) {
        self.channels.insert(channel.id(), Arc::clone(&channel));
        channel.bind_connection(Arc::clone(self));
    }

    /// Remove a channel from this connection's map (normal half-close/close
    /// path, before connection teardown).
    pub fn unlink_channel(&self, id: u32) {
        self.channels.remove(&id);
    }

    /// Empty this connection's channel map, returning every channel it held.
    /// Called once, at disposal time.
    fn drain_channels(&self) -> Vec<Arc<Channel>> {
        let ids: Vec<u32> = self.channels.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.channels.remove(&id).map(|(_, v)| v)).collect()
    }

    /// Open a channel directly on this connection, bypassing the Peer's
    /// router (spec.md §4.2).
    pub async fn open(self: &Arc<Self>, service: impl Into<String>, headers: Vec<String>) -> Result<Arc<Channel>, DuplexError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DuplexError::Closed);
        }
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let service = service.into();
        let channel = Channel::new(id, service.clone(), headers.clone(), false);
        self.send_frame_on_connection(&Frame::open(id, service, headers)).await?;
        self.link_channel(Arc::clone(&channel));
        channel.spawn_outgoing_pump();
        Ok(channel)
    }

    /// Close the transport. Idempotent.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.close_tx.try_send(());
    }

    async fn dispatch_incoming(self: &Arc<Self>, frame: Frame, peer: &WeakPeerHandle) {
        match frame.kind {
            FrameKind::Data => {
                let channel = self.channels.get(&frame.channel_id).map(|entry| Arc::clone(entry.value()));
                match channel {
                    Some(channel) => {
                        channel.handle_incoming(frame);
                    }
                    None => {
                        trace!(channel_id = frame.channel_id, endpoint = %self.endpoint, "dropped frame for unknown channel");
                    }
                }
            }
            FrameKind::Open => {
                if self.channels.contains_key(&frame.channel_id) {
                    trace!(channel_id = frame.channel_id, "duplicate open-frame for a known channel, ignoring");
                    return;
                }
                peer.handle_open(Arc::clone(self), frame).await;
            }
        }
    }
}

/// Spawn the background driver task for a freshly established connection
/// and return the shared handle to it. `next_channel_id` is the Peer's
/// monotonic id counter, shared so ids stay unique across every Connection
/// the Peer owns. `peer` is a weak handle back to the owning Peer, used only
/// to deliver inbound open-frames and to report disposal — kept weak so a
/// live Connection's driver task never keeps the Peer itself alive (spec.md
/// §9's note on the Channel↔Connection↔Peer cycle).
pub fn spawn<T>(
    established: EstablishedConnection<T>,
    endpoint: Endpoint,
    next_channel_id: Arc<AtomicU32>,
    peer: WeakPeerHandle,
) -> Arc<Connection>
where
    T: MessageTransport + 'static,
{
    let (outbound_tx, outbound_rx) = flume::bounded(CHANNEL_QUEUE_HWM);
    let (close_tx, close_rx) = flume::bounded(1);

    let connection = Arc::new(Connection {
        remote_peer_id: established.remote_peer_id,
        endpoint,
        channels: DashMap::new(),
        outbound_tx,
        close_tx,
        next_channel_id,
        closed: AtomicBool::new(false),
    });

    let driver_connection = Arc::clone(&connection);
    compio::runtime::spawn(async move {
        drive(established.transport, driver_connection, outbound_rx, close_rx, peer).await;
    })
    .detach();

    connection
}

async fn drive<T>(
    mut transport: FrameTransport<T>,
    connection: Arc<Connection>,
    outbound_rx: Receiver<Frame>,
    close_rx: Receiver<()>,
    peer: WeakPeerHandle,
) where
    T: MessageTransport,
{
    loop {
        futures::select_biased! {
            _ = close_rx.recv_async() => break,
            outgoing = outbound_rx.recv_async() => {
                match outgoing {
                    Ok(frame) => {
                        if let Err(err) = transport.send_frame(&frame).await {
                            debug!(endpoint = %connection.endpoint(), error = %err, "connection write failed");
                            break;
                        }
                    }
                    Err(_disconnected) => break,
                }
            }
            incoming = transport.recv_frame() => {
                match incoming {
                    Ok(Some(frame)) => connection.dispatch_incoming(frame, &peer).await,
                    Ok(None) => break,
                    Err(err) => {
                        debug!(endpoint = %connection.endpoint(), error = %err, "connection read failed");
                        break;
                    }
                }
            }
        }
    }

    connection.closed.store(true, Ordering::Release);
    let orphaned = connection.drain_channels();
    peer.handle_connection_disposed(Arc::clone(&connection), orphaned).await;
}
