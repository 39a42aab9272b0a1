//! The in-process transport registry.
//!
//! `inproc://name` endpoints are resolved through an explicitly constructed
//! [`InprocRegistry`], not process-wide global state — the wire spec calls
//! this out directly so that tests (and co-located peers within one
//! process that want isolation) can each own a fresh registry instead of
//! colliding on a shared static.

use std::io;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use dashmap::DashMap;
use flume::{Receiver, Sender};

/// One multiplexed message: a length-prefixed frame's raw wire bytes —
/// `duplex`'s `inproc` transport adapter exchanges whole encoded frames
/// here rather than raw byte-stream fragments, since there is no real
/// socket to frame on.
pub type InprocMessage = Bytes;

/// Sender half of an established in-process pipe.
pub type InprocSender = Sender<InprocMessage>;
/// Receiver half of an established in-process pipe.
pub type InprocReceiver = Receiver<InprocMessage>;

/// A connected pair of channels, one per direction, handed to one side of
/// an in-process connection.
#[derive(Debug, Clone)]
pub struct InprocPipe {
    pub tx: InprocSender,
    pub rx: InprocReceiver,
}

/// A pending connection request delivered to a bound listener.
pub type InprocAccept = Sender<InprocPipe>;

/// An explicitly constructed registry of `inproc://` endpoints.
///
/// Tests and co-located peers each build their own `InprocRegistry` rather
/// than reaching for a process-wide static, so endpoint names never
/// collide across unrelated tests running in the same process.
#[derive(Debug, Default)]
pub struct InprocRegistry {
    binds: DashMap<String, InprocAccept>,
}

impl InprocRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binds: DashMap::new(),
        }
    }

    /// Bind `name`, returning the receiving half of its accept queue.
    /// Fails with `AddrInUse` if already bound.
    pub fn bind(&self, name: &str) -> io::Result<Receiver<InprocPipe>> {
        let (tx, rx) = flume::unbounded();
        if self.binds.insert(name.to_string(), tx).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("inproc endpoint '{name}' is already bound"),
            ));
        }
        Ok(rx)
    }

    /// Remove `name` from the registry.
    pub fn unbind(&self, name: &str) {
        self.binds.remove(name);
    }

    /// Connect to a bound endpoint, returning the dialer's own pipe.
    /// Fails with `NotFound` if nothing is bound under `name`.
    pub fn connect(&self, name: &str) -> io::Result<InprocPipe> {
        let accept_tx = self
            .binds
            .get(name)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("inproc endpoint '{name}' not found (must bind before connect)"),
                )
            })?
            .clone();

        let (client_tx, server_rx) = flume::unbounded();
        let (server_tx, client_rx) = flume::unbounded();

        accept_tx
            .send(InprocPipe {
                tx: server_tx,
                rx: server_rx,
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "listener dropped"))?;

        Ok(InprocPipe {
            tx: client_tx,
            rx: client_rx,
        })
    }

    /// Names currently bound, for diagnostics and tests.
    #[must_use]
    pub fn bound_names(&self) -> Vec<String> {
        self.binds.iter().map(|e| e.key().clone()).collect()
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<InprocRegistry>> = OnceLock::new();

/// The process-wide default registry `Peer::new()` binds/dials `inproc://`
/// endpoints against, so unrelated peers within one process can rendezvous
/// without the application wiring a registry between them by hand. Tests
/// that want isolation from other tests running in the same process build
/// their own `InprocRegistry` and inject it via `Peer::with_registry`
/// instead of reaching for this one.
#[must_use]
pub fn global_registry() -> Arc<InprocRegistry> {
    Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(InprocRegistry::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_before_bind_fails() {
        let registry = InprocRegistry::new();
        let err = registry.connect("missing").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn duplicate_bind_fails() {
        let registry = InprocRegistry::new();
        let _rx = registry.bind("dup").unwrap();
        let err = registry.bind("dup").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn connect_delivers_pipe_to_listener() {
        let registry = InprocRegistry::new();
        let accept_rx = registry.bind("ep").unwrap();

        let client_pipe = registry.connect("ep").unwrap();
        let server_pipe = accept_rx.recv().unwrap();

        client_pipe.tx.send(Bytes::from_static(b"hello")).unwrap();
        let got = server_pipe.rx.recv().unwrap();
        assert_eq!(got, Bytes::from_static(b"hello"));
    }

    #[test]
    fn fresh_registries_do_not_see_each_others_binds() {
        let a = InprocRegistry::new();
        let b = InprocRegistry::new();
        let _rx = a.bind("shared-name").unwrap();
        assert!(b.connect("shared-name").is_err());
    }

    #[test]
    fn unbind_frees_the_name() {
        let registry = InprocRegistry::new();
        let _rx = registry.bind("ep").unwrap();
        registry.unbind("ep");
        assert!(registry.bound_names().is_empty());
        assert!(registry.connect("ep").is_err());
    }
}
