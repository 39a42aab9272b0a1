//! [`Peer`]: the top-level handle — listeners, connections, the router, and
//! the accept queue (spec.md §4.1).

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use duplex_core::auth::{default_authorized_keys_path, default_private_key_path, load_authorized_keys, load_private_key};
use duplex_core::endpoint::Endpoint;
use duplex_core::error::DuplexError;
use duplex_core::id::PeerId;
use duplex_core::inproc::InprocRegistry;
use duplex_core::options::{OptionKey, OptionValue, PeerOptions};
use duplex_core::reconnect::ReconnectState;
use duplex_transport::adapters::{self, DialedTransport};
use duplex_transport::frame::{Frame, FrameKind};
use duplex_transport::handshake::StaticIdentity;

use crate::channel::Channel;
use crate::connection::{self, Connection};
use crate::listener::{self, ListenerHandle};
use crate::router::{self, RouteItem};

/// One accepted channel awaiting `Peer::accept`.
struct PendingAccept {
    channel: Arc<Channel>,
}

struct PeerInner {
    local_peer_id: PeerId,
    identity: Arc<StaticIdentity>,
    authorized_keys: Option<Arc<[[u8; 32]]>>,
    options: Mutex<PeerOptions>,

    inproc_registry: Arc<InprocRegistry>,
    next_channel_id: Arc<AtomicU32>,
    next_connection_key: AtomicU64,
    round_robin_cursor: AtomicUsize,

    listeners: DashMap<Endpoint, ListenerHandle>,
    connections: DashMap<u64, Arc<Connection>>,

    route_tx: Mutex<Option<Sender<RouteItem>>>,
    first_conn_tx: Mutex<Option<Sender<()>>>,

    accept_tx: Mutex<Option<Sender<PendingAccept>>>,
    accept_rx: Receiver<PendingAccept>,

    shutdown: std::sync::atomic::AtomicBool,
}

impl PeerInner {
    fn register_connection(self: &Arc<Self>, connection: Arc<Connection>) -> u64 {
        let key = self.next_connection_key.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(key, connection);
        if let Some(tx) = self.first_conn_tx.lock().as_ref() {
            let _ = tx.try_send(());
        }
        key
    }

    fn remove_connection_by_ptr(&self, connection: &Arc<Connection>) {
        let target = Arc::as_ptr(connection);
        let key = self
            .connections
            .iter()
            .find(|entry| Arc::as_ptr(entry.value()) == target)
            .map(|entry| *entry.key());
        if let Some(key) = key {
            self.connections.remove(&key);
        }
    }

    /// Find any other live connection to `remote`, used to re-home orphaned
    /// client-side channels after their connection drops (spec.md §9's open
    /// question (a), resolved in favor of not hanging indefinitely: if no
    /// alternate route exists the channel closes with an error instead).
    fn find_alternate_connection(&self, remote: PeerId) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|entry| entry.value().remote_peer_id() == remote)
            .map(|entry| Arc::clone(entry.value()))
    }
}

/// A weak, non-owning handle to a [`PeerInner`], held by the router,
/// Connection driver, and listener tasks so none of them keep the `Peer`
/// itself alive (spec.md §9's note on the Channel↔Connection↔Peer cycle).
#[derive(Clone)]
pub(crate) struct WeakPeerHandle(Weak<PeerInner>);

impl WeakPeerHandle {
    fn upgrade(&self) -> Option<Arc<PeerInner>> {
        self.0.upgrade()
    }

    /// Register a freshly accepted inbound connection.
    pub(crate) async fn register_inbound_connection(&self, connection: Arc<Connection>) {
        let Some(inner) = self.upgrade() else {
            connection.disconnect();
            return;
        };
        info!(remote = %connection.remote_peer_id(), endpoint = %connection.endpoint(), "accepted connection");
        inner.register_connection(connection);
    }

    /// Deliver an inbound open-frame to the accept queue as a server-side
    /// channel, bound immediately to the connection it arrived on.
    pub(crate) async fn handle_open(&self, connection: Arc<Connection>, frame: Frame) {
        debug_assert_eq!(frame.kind, FrameKind::Open);
        let Some(inner) = self.upgrade() else { return };

        let service = frame.service.clone().unwrap_or_default();
        let channel = Channel::new(frame.channel_id, service, frame.headers.clone(), true);
        connection.link_channel(Arc::clone(&channel));

        let accept_tx = inner.accept_tx.lock().clone();
        let Some(accept_tx) = accept_tx else {
            channel.close(Some(DuplexError::state("peer is shutting down"))).await;
            return;
        };
        if accept_tx.send_async(PendingAccept { channel: Arc::clone(&channel) }).await.is_err() {
            channel.close(Some(DuplexError::state("peer is shutting down"))).await;
        }
    }

    /// A Connection's driver task has exited. Reconcile its orphaned
    /// channels: server-side channels simply close (their opener was this
    /// connection's remote, there is nowhere else to route them); client-side
    /// channels re-home onto another live connection to the same remote if
    /// one exists, else close with a routing error.
    pub(crate) async fn handle_connection_disposed(&self, connection: Arc<Connection>, orphaned: Vec<Arc<Channel>>) {
        let Some(inner) = self.upgrade() else { return };
        inner.remove_connection_by_ptr(&connection);
        warn!(remote = %connection.remote_peer_id(), endpoint = %connection.endpoint(), "connection disposed");

        for channel in orphaned {
            if channel.is_closed() {
                continue;
            }
            if channel.is_server() {
                channel.close(Some(DuplexError::state("connection dropped"))).await;
                continue;
            }
            match inner.find_alternate_connection(connection.remote_peer_id()) {
                Some(alternate) => alternate.link_channel(channel),
                None => {
                    channel
                        .close(Some(DuplexError::not_found("no alternate route to remote peer")))
                        .await;
                }
            }
        }
    }
}

/// A symmetric peer-to-peer messaging endpoint: binds listeners, dials
/// connections, and exposes the multiplexed-channel surface (spec.md §4.1).
#[derive(Clone)]
pub struct Peer(Arc<PeerInner>);

impl Peer {
    /// Build a peer with default options.
    pub async fn new() -> Result<Self, DuplexError> {
        Self::with_options(PeerOptions::new()).await
    }

    /// Build a peer with explicit options (spec.md §6's `SetOption` surface,
    /// applied up front), dialing/binding `inproc://` endpoints against the
    /// process-wide default registry (see
    /// [`duplex_core::inproc::global_registry`]).
    pub async fn with_options(options: PeerOptions) -> Result<Self, DuplexError> {
        Self::with_registry(options, duplex_core::inproc::global_registry()).await
    }

    /// Build a peer against an explicitly supplied in-process registry.
    /// Tests that want `inproc://` isolation from other tests running in
    /// the same process construct a fresh [`InprocRegistry`] and pass it
    /// here instead of going through [`Self::new`]/[`Self::with_options`],
    /// which share the process-wide default (spec.md §9's note on the
    /// registry being an explicitly-constructed object, never implicit
    /// global state baked into `Peer` itself).
    pub async fn with_registry(options: PeerOptions, inproc_registry: Arc<InprocRegistry>) -> Result<Self, DuplexError> {
        let local_peer_id = match &options.name {
            Some(name) => name.parse().unwrap_or_else(|_| PeerId::generate()),
            None => PeerId::generate(),
        };

        let identity = Arc::new(load_or_generate_identity(&options)?);
        let authorized_keys = resolve_authorized_keys(&options)?;

        let (route_tx, route_rx) = flume::bounded(duplex_core::options::CHANNEL_QUEUE_HWM);
        let (first_conn_tx, first_conn_rx) = flume::bounded(1);
        let (accept_tx, accept_rx) = flume::bounded(duplex_core::options::CHANNEL_QUEUE_HWM);

        let inner = Arc::new(PeerInner {
            local_peer_id,
            identity,
            authorized_keys,
            options: Mutex::new(options),
            inproc_registry,
            next_channel_id: Arc::new(AtomicU32::new(1)),
            next_connection_key: AtomicU64::new(0),
            round_robin_cursor: AtomicUsize::new(0),
            listeners: DashMap::new(),
            connections: DashMap::new(),
            route_tx: Mutex::new(Some(route_tx)),
            first_conn_tx: Mutex::new(Some(first_conn_tx)),
            accept_tx: Mutex::new(Some(accept_tx)),
            accept_rx,
            shutdown: std::sync::atomic::AtomicBool::new(false),
        });

        compio::runtime::spawn(router::run(Arc::downgrade(&inner), route_rx, first_conn_rx)).detach();

        Ok(Self(inner))
    }

    fn downgrade(&self) -> WeakPeerHandle {
        WeakPeerHandle(Arc::downgrade(&self.0))
    }

    #[must_use]
    pub fn id(&self) -> PeerId {
        self.0.local_peer_id
    }

    /// Bind a listener at `endpoint` (spec.md §4.4).
    pub async fn bind(&self, endpoint: &str) -> Result<(), DuplexError> {
        let endpoint = Endpoint::parse(endpoint).map_err(|e| DuplexError::config(e.to_string()))?;
        if self.0.listeners.contains_key(&endpoint) {
            return Err(DuplexError::config(format!("already bound to {endpoint}")));
        }
        let handle = listener::bind(
            endpoint.clone(),
            Arc::clone(&self.0.identity),
            self.0.authorized_keys.clone(),
            self.0.local_peer_id,
            Arc::clone(&self.0.next_channel_id),
            Arc::clone(&self.0.inproc_registry),
            self.downgrade(),
        )
        .await?;
        info!(%endpoint, "bound listener");
        self.0.listeners.insert(endpoint, handle);
        Ok(())
    }

    /// Stop accepting on a previously bound endpoint.
    pub fn unbind(&self, endpoint: &str) -> Result<(), DuplexError> {
        let endpoint = Endpoint::parse(endpoint).map_err(|e| DuplexError::config(e.to_string()))?;
        match self.0.listeners.remove(&endpoint) {
            Some((_, handle)) => {
                handle.stop();
                if endpoint.is_inproc() {
                    if let Endpoint::Inproc(name) = &endpoint {
                        self.0.inproc_registry.unbind(name);
                    }
                }
                Ok(())
            }
            None => Err(DuplexError::not_found(format!("not bound to {endpoint}"))),
        }
    }

    /// Dial `endpoint`, retrying per the configured reconnect policy until
    /// success or retry is disabled (spec.md §4.1). This call makes one
    /// logical connection attempt end to end; it does not keep re-dialing
    /// after a later drop of the resulting connection.
    pub async fn connect(&self, endpoint: &str) -> Result<(), DuplexError> {
        let parsed = Endpoint::parse(endpoint).map_err(|e| DuplexError::config(e.to_string()))?;
        let mut backoff = ReconnectState::from_options(&self.0.options.lock());

        loop {
            match adapters::dial(&parsed, &self.0.identity, self.0.authorized_keys.as_deref(), self.0.local_peer_id, &self.0.inproc_registry).await {
                Ok(dialed) => {
                    self.register_dialed(parsed.clone(), dialed);
                    return Ok(());
                }
                Err(err) => {
                    debug!(endpoint = %parsed, error = %err, "dial attempt failed");
                    match backoff.as_mut() {
                        Some(state) => {
                            let delay = state.next_delay();
                            compio::time::sleep(delay).await;
                        }
                        None => return Err(DuplexError::config(format!("connect to {parsed} failed: {err}"))),
                    }
                }
            }
        }
    }

    fn register_dialed(&self, endpoint: Endpoint, dialed: DialedTransport) {
        let weak = self.downgrade();
        let next_channel_id = Arc::clone(&self.0.next_channel_id);
        let connection = match dialed {
            DialedTransport::Tcp(established) => connection::spawn(established, endpoint, next_channel_id, weak),
            #[cfg(unix)]
            DialedTransport::Unix(established) => connection::spawn(established, endpoint, next_channel_id, weak),
            DialedTransport::Inproc(established) => connection::spawn(established, endpoint, next_channel_id, weak),
        };
        info!(remote = %connection.remote_peer_id(), "connected");
        self.0.register_connection(connection);
    }

    /// Disconnect every connection to `remote`, if any.
    pub fn disconnect(&self, remote: PeerId) {
        let keys: Vec<u64> = self
            .0
            .connections
            .iter()
            .filter(|e| e.value().remote_peer_id() == remote)
            .map(|e| *e.key())
            .collect();
        for key in keys {
            if let Some((_, connection)) = self.0.connections.remove(&key) {
                connection.disconnect();
            }
        }
    }

    /// Drop an entire peer relationship: disconnect all connections to
    /// `remote` and forget it.
    pub fn drop_peer(&self, remote: PeerId) {
        self.disconnect(remote);
    }

    /// Remote peer ids this peer currently holds at least one live
    /// connection to.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.0.connections.iter().map(|e| e.value().remote_peer_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Round-robin over currently connected remote peers, sharing the
    /// cursor the router uses for connection selection (spec.md §3).
    #[must_use]
    pub fn next_peer(&self) -> Option<PeerId> {
        let peers = self.peers();
        if peers.is_empty() {
            return None;
        }
        let cursor = self.0.round_robin_cursor.fetch_add(1, Ordering::Relaxed);
        Some(peers[cursor % peers.len()])
    }

    /// Open a channel, routed by the Peer's router across its connections
    /// (spec.md §4.1/§4.3). Pass `target` to pin the open to one remote peer
    /// instead of round-robining across all of them.
    pub async fn open(&self, service: impl Into<String>, headers: Vec<String>, target: Option<PeerId>) -> Result<Arc<Channel>, DuplexError> {
        if self.0.shutdown.load(Ordering::Acquire) {
            return Err(DuplexError::state("peer is shut down"));
        }
        if let Some(target) = target {
            let connected = self.0.connections.iter().any(|entry| entry.value().remote_peer_id() == target);
            if !connected {
                return Err(DuplexError::not_found(format!("no connection to peer {target}")));
            }
        }
        let id = self.0.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let service = service.into();
        let channel = Channel::new(id, service.clone(), headers.clone(), false);
        channel.spawn_outgoing_pump();

        let route_tx = self.0.route_tx.lock().clone();
        let Some(route_tx) = route_tx else {
            channel.close(Some(DuplexError::state("peer is shut down"))).await;
            return Err(DuplexError::state("peer is shut down"));
        };

        let frame = Frame::open(id, service, headers);
        route_tx
            .send_async(RouteItem { frame, channel: Arc::clone(&channel), target })
            .await
            .map_err(|_| DuplexError::state("peer is shut down"))?;

        Ok(channel)
    }

    /// Accept the next server-side channel opened by a remote peer (spec.md
    /// §4.1). Returns `None` once the peer has shut down.
    pub async fn accept(&self) -> Option<Arc<Channel>> {
        let pending = self.0.accept_rx.recv_async().await.ok()?;
        pending.channel.spawn_outgoing_pump();
        Some(pending.channel)
    }

    /// Apply a `SetOption` call.
    pub fn set_option(&self, key: OptionKey, value: OptionValue) -> Result<(), DuplexError> {
        self.0.options.lock().set(key, value)
    }

    /// Read back a previously set option.
    #[must_use]
    pub fn get_option(&self, key: OptionKey) -> Option<OptionValue> {
        self.0.options.lock().get(key)
    }

    /// Tear the peer down: stop every listener, disconnect every connection,
    /// and close the routing/accept queues so in-flight `open`/`accept`
    /// calls observe the shutdown deterministically rather than relying on
    /// implicit drop-ordering (spec.md §5).
    pub fn shutdown(&self) -> Result<(), DuplexError> {
        if self.0.shutdown.swap(true, Ordering::AcqRel) {
            return Err(DuplexError::state("peer already shut down"));
        }
        for entry in self.0.listeners.iter() {
            entry.value().stop();
        }
        self.0.listeners.clear();
        for entry in self.0.connections.iter() {
            entry.value().disconnect();
        }
        self.0.connections.clear();
        self.0.route_tx.lock().take();
        self.0.accept_tx.lock().take();
        self.0.first_conn_tx.lock().take();
        Ok(())
    }
}

impl Drop for PeerInner {
    fn drop(&mut self) {
        for entry in self.connections.iter() {
            entry.value().disconnect();
        }
    }
}

/// Resolve this peer's static identity: the configured (or default)
/// private-key path if it actually exists on disk, else a fresh ephemeral
/// identity (matching `StaticIdentity::generate`'s own doc comment on this
/// fallback).
fn load_or_generate_identity(options: &PeerOptions) -> Result<StaticIdentity, DuplexError> {
    let path = options.private_key.clone().or_else(default_private_key_path);
    match path {
        Some(path) if path.exists() => {
            let bytes = load_private_key(&path)?;
            StaticIdentity::from_bytes(&bytes).map_err(|e| DuplexError::auth(e.to_string()))
        }
        _ => Ok(StaticIdentity::generate()),
    }
}

/// Resolve the configured authorized-keys allowlist. Permissive by default:
/// if no `AuthorizedKeys` option is set and the default path doesn't exist,
/// `None` is returned, meaning "accept any remote static key" — this keeps
/// ad hoc/test peers usable without manual key provisioning, and matches how
/// a freshly `Peer::new()`'d pair of dev processes is expected to just work.
fn resolve_authorized_keys(options: &PeerOptions) -> Result<Option<Arc<[[u8; 32]]>>, DuplexError> {
    let path = options.authorized_keys.clone().or_else(default_authorized_keys_path);
    match path {
        Some(path) if path.exists() => {
            let keys = load_authorized_keys(&path)?;
            Ok(Some(Arc::from(keys.into_boxed_slice())))
        }
        _ => Ok(None),
    }
}
