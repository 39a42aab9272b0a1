//! The Peer's router task (spec.md §4.1): places client-initiated
//! open-frames onto Connections, round-robin or targeted, preserving FIFO
//! order across the routing queue.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use flume::Receiver;
use tracing::{debug, trace};

use duplex_core::error::DuplexError;
use duplex_core::id::PeerId;
use duplex_transport::frame::Frame;

use crate::channel::Channel;
use crate::peer::PeerInner;

/// One routable open-frame awaiting a Connection.
pub(crate) struct RouteItem {
    pub frame: Frame,
    pub channel: Arc<Channel>,
    pub target: Option<PeerId>,
}

/// The router's run loop. Takes a weak handle to the owning peer so the
/// task never itself keeps the Peer alive; it exits as soon as either the
/// peer is gone or the routing queue closes.
pub(crate) async fn run(peer: std::sync::Weak<PeerInner>, route_rx: Receiver<RouteItem>, first_conn_rx: Receiver<()>) {
    loop {
        let Some(inner) = peer.upgrade() else { return };
        if inner.connections.is_empty() {
            drop(inner);
            if first_conn_rx.recv_async().await.is_err() {
                return;
            }
            continue;
        }
        drop(inner);

        let item = match route_rx.recv_async().await {
            Ok(item) => item,
            Err(_closed) => return,
        };

        let Some(inner) = peer.upgrade() else { return };
        route_one(&inner, item).await;
    }
}

async fn route_one(inner: &Arc<PeerInner>, item: RouteItem) {
    let RouteItem { frame, channel, target } = item;
    let mut tried: HashSet<u64> = HashSet::new();

    loop {
        let candidates: Vec<_> = inner
            .connections
            .iter()
            .filter(|entry| target.map_or(true, |t| entry.value().remote_peer_id() == t))
            .filter(|entry| !tried.contains(entry.key()))
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let chosen = if candidates.is_empty() {
            None
        } else if target.is_some() {
            candidates.into_iter().next()
        } else {
            let cursor = inner.round_robin_cursor.fetch_add(1, Ordering::Relaxed);
            Some(candidates[cursor % candidates.len()].clone())
        };

        let Some((key, connection)) = chosen else {
            debug!(channel_id = channel.id(), "no reachable connection to route open-frame");
            channel
                .close(Some(DuplexError::not_found("no connection currently available to route this channel")))
                .await;
            return;
        };

        match connection.send_frame_on_connection(&frame).await {
            Ok(()) => {
                connection.link_channel(Arc::clone(&channel));
                trace!(channel_id = channel.id(), remote = %connection.remote_peer_id(), "routed open-frame");
                return;
            }
            Err(_) => {
                tried.insert(key);
            }
        }
    }
}
