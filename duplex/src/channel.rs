//! [`Channel`]: a logical, ordered, bidirectional frame stream multiplexed
//! on a [`crate::connection::Connection`] (spec.md §3/§4.3).

use std::sync::Arc;

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use duplex_core::error::DuplexError;
use duplex_core::options::CHANNEL_QUEUE_HWM;
use duplex_transport::frame::Frame;

use crate::connection::Connection;

/// Capacity-1 "connection bound" signal a [`Channel`]'s outgoing pump waits
/// on (spec.md §9's "connection-change signalling").
type ConnSignalTx = Sender<Arc<Connection>>;
type ConnSignalRx = Receiver<Arc<Connection>>;

#[derive(Debug, Default)]
struct ChannelState {
    closed: bool,
    error: Option<DuplexError>,
    received_last: bool,
    sent_last: bool,
}

/// A logical bidirectional stream keyed by `(origin-peer, local channel-id)`.
pub struct Channel {
    id: u32,
    service: String,
    headers: Vec<String>,
    is_server: bool,

    inbound_tx: Mutex<Option<Sender<Frame>>>,
    inbound_rx: Receiver<Frame>,
    outbound_tx: Sender<Frame>,
    outbound_rx: Mutex<Option<Receiver<Frame>>>,

    conn_signal_tx: Mutex<Option<ConnSignalTx>>,
    conn_signal_rx: Mutex<Option<ConnSignalRx>>,
    current_connection: Mutex<Option<Arc<Connection>>>,

    state: Mutex<ChannelState>,
}

impl Channel {
    /// Build a fresh channel. `id` is assigned by the opener (client or, on
    /// the accepting side, copied verbatim from the inbound open-frame).
    #[must_use]
    pub fn new(id: u32, service: impl Into<String>, headers: Vec<String>, is_server: bool) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = flume::bounded(CHANNEL_QUEUE_HWM);
        let (outbound_tx, outbound_rx) = flume::bounded(CHANNEL_QUEUE_HWM);
        let (conn_signal_tx, conn_signal_rx) = flume::bounded(1);

        Arc::new(Self {
            id,
            service: service.into(),
            headers,
            is_server,
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            conn_signal_tx: Mutex::new(Some(conn_signal_tx)),
            conn_signal_rx: Mutex::new(Some(conn_signal_rx)),
            current_connection: Mutex::new(None),
            state: Mutex::new(ChannelState::default()),
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[must_use]
    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// The terminal error, if the channel has closed with one.
    #[must_use]
    pub fn error(&self) -> Option<DuplexError> {
        self.state.lock().error.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enqueue a data-frame on the outbound queue. Non-blocking unless the
    /// queue is full (bounded at `CHANNEL_QUEUE_HWM`).
    pub async fn send_frame(&self, mut frame: Frame) -> Result<(), DuplexError> {
        {
            let state = self.state.lock();
            if state.closed || state.error.is_some() {
                return Err(DuplexError::Closed);
            }
        }
        frame.channel_id = self.id;
        frame.kind = duplex_transport::frame::FrameKind::Data;
        self.outbound_tx
            .send_async(frame)
            .await
            .map_err(|_| DuplexError::Closed)
    }

    /// Convenience: enqueue an error-frame.
    pub async fn send_err(&self, message: impl Into<String>, last: bool) -> Result<(), DuplexError> {
        self.send_frame(Frame::error_frame(self.id, message, last)).await
    }

    /// Blocking dequeue from the inbound queue. Returns `None` once the
    /// channel has terminated.
    pub async fn receive_frame(&self) -> Option<Frame> {
        match self.inbound_rx.recv_async().await {
            Ok(frame) => {
                if frame.last {
                    self.state.lock().received_last = true;
                    if !self.is_server {
                        // Client side: receiving last closes the channel.
                        self.close(None).await;
                    }
                }
                Some(frame)
            }
            Err(_disconnected) => None,
        }
    }

    /// Called by the Connection reader when a frame addressed to this
    /// channel arrives. Returns `false` if the channel was already closed.
    pub fn handle_incoming(self: &Arc<Self>, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }

        if frame.has_error() && !frame.last {
            let message = frame.error.clone().unwrap_or_default();
            let this = Arc::clone(self);
            compio::runtime::spawn(async move {
                this.close(Some(DuplexError::remote(message))).await;
            })
            .detach();
            return true;
        }

        let delivered = self
            .inbound_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.try_send(frame).is_ok());
        if !delivered {
            debug!(channel_id = self.id, "inbound queue overflow or already closing, dropping frame");
        }
        true
    }

    /// Idempotent terminal close. Subsequent `send_frame`/`receive_frame`
    /// observe the closed state.
    pub async fn close(&self, err: Option<DuplexError>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if state.error.is_none() {
            state.error = err;
        }
        drop(state);
        trace!(channel_id = self.id, "channel closed");
        // Dropping the signal sender unblocks the outgoing pump, which
        // observes a disconnected signal channel and exits.
        self.conn_signal_tx.lock().take();
        // Dropping the inbound sender unblocks a pending `receive_frame`
        // once any already-queued frames are drained, even if the close
        // was triggered without ever delivering a final frame (e.g. an
        // out-of-band error-frame intercepted in `handle_incoming`).
        self.inbound_tx.lock().take();
        if let Some(connection) = self.current_connection.lock().take() {
            connection.unlink_channel(self.id);
        }
    }

    /// Whether the server-side termination condition holds: received AND
    /// sent a last-flagged frame (spec.md §3).
    fn server_done(&self) -> bool {
        let state = self.state.lock();
        state.received_last && state.sent_last
    }

    /// Publish the channel's initial/rebound Connection. Called by the
    /// router when it links an open-frame to a Connection, or immediately
    /// for server-side channels at construction.
    pub fn bind_connection(&self, connection: Arc<Connection>) {
        *self.current_connection.lock() = Some(Arc::clone(&connection));
        if let Some(tx) = self.conn_signal_tx.lock().as_ref() {
            let _ = tx.try_send(connection);
        }
    }

    /// Re-announce this channel on a newly (re)bound Connection by resending
    /// its open-frame with the original id/service/headers. The channel was
    /// only ever introduced to its *first* Connection via the router; a
    /// rebind after a connection drop lands on a Connection that has never
    /// heard of this channel id, so the open has to be replayed before any
    /// queued data-frame can make sense to the remote (spec.md §9's
    /// survive-drop note, resolved here by re-announcing rather than
    /// assuming the remote retains cross-connection state). Best-effort:
    /// failure here just means the next data-frame send fails too and the
    /// pump waits for yet another Connection.
    async fn reannounce(&self, connection: &Arc<Connection>) {
        if self.is_server {
            return;
        }
        let open = Frame::open(self.id, self.service.clone(), self.headers.clone());
        let _ = connection.send_frame_on_connection(&open).await;
    }

    /// Take the outbound-queue receiver and connection-change-signal
    /// receiver, to be driven by the per-channel outgoing pump task. May
    /// only be called once per channel.
    fn take_pump_handles(&self) -> Option<(Receiver<Frame>, ConnSignalRx)> {
        let outbound_rx = self.outbound_rx.lock().take()?;
        let conn_rx = self.conn_signal_rx.lock().take()?;
        Some((outbound_rx, conn_rx))
    }

    /// Spawn this channel's outgoing pump: waits on either the
    /// connection-change signal or the outbound queue, delivering frames on
    /// whichever Connection is currently bound and transparently retrying
    /// across a rebind (spec.md §4.3/§9).
    pub fn spawn_outgoing_pump(self: &Arc<Self>) {
        let Some((outbound_rx, conn_rx)) = self.take_pump_handles() else {
            return;
        };
        let channel = Arc::clone(self);
        compio::runtime::spawn(async move {
            channel.run_outgoing_pump(outbound_rx, conn_rx).await;
        })
        .detach();
    }

    async fn run_outgoing_pump(self: Arc<Self>, outbound_rx: Receiver<Frame>, conn_rx: ConnSignalRx) {
        let Ok(mut current) = conn_rx.recv_async().await else {
            return;
        };

        loop {
            futures::select_biased! {
                new_conn = conn_rx.recv_async() => {
                    match new_conn {
                        Ok(c) => {
                            current = c;
                            self.reannounce(&current).await;
                        }
                        Err(_closed) => return,
                    }
                }
                frame = outbound_rx.recv_async() => {
                    let Ok(mut frame) = frame else { return };
                    loop {
                        match current.send_frame_on_connection(&frame).await {
                            Ok(()) => break,
                            Err(_) => {
                                match conn_rx.recv_async().await {
                                    Ok(c) => {
                                        current = c;
                                        self.reannounce(&current).await;
                                        continue;
                                    }
                                    Err(_closed) => return,
                                }
                            }
                        }
                    }

                    let was_last = frame.last;
                    let had_error = frame.has_error();
                    frame.payload.clear();

                    if was_last && self.is_server {
                        self.state.lock().sent_last = true;
                        if self.server_done() {
                            self.close(None).await;
                        }
                    }
                    if had_error {
                        let message = frame.error.take().unwrap_or_default();
                        self.close(Some(DuplexError::remote(message))).await;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("is_server", &self.is_server)
            .field("closed", &self.is_closed())
            .finish()
    }
}
