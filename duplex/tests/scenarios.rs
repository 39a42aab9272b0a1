//! End-to-end scenarios over `inproc://` transport: echo, round-robin
//! fan-out, streaming accumulation, half-close from either side, targeted
//! open, and shutdown draining.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use duplex::{Frame, InprocRegistry, Peer, PeerOptions};

async fn peer_on(registry: &Arc<InprocRegistry>) -> Peer {
    Peer::with_registry(PeerOptions::new(), Arc::clone(registry)).await.unwrap()
}

#[compio::test]
async fn echo_roundtrip() {
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://echo").await.unwrap();

    let server_task = compio::runtime::spawn({
        let server = server.clone();
        async move {
            let channel = server.accept().await.unwrap();
            let frame = channel.receive_frame().await.unwrap();
            channel.send_frame(Frame::data(0, frame.payload, true)).await.unwrap();
        }
    });

    let client = peer_on(&registry).await;
    client.connect("inproc://echo").await.unwrap();
    let channel = client.open("echo", vec![], None).await.unwrap();
    channel.send_frame(Frame::data(0, Bytes::from_static(b"hello"), true)).await.unwrap();

    let reply = channel.receive_frame().await.unwrap();
    assert_eq!(reply.payload.as_ref(), b"hello");
    assert!(reply.last);
    assert!(channel.receive_frame().await.is_none());
    assert!(channel.is_closed());
    assert!(channel.error().is_none());

    server_task.await.unwrap();
}

#[compio::test]
async fn ordering_is_preserved_within_a_channel() {
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://ordering").await.unwrap();

    let server_task = compio::runtime::spawn({
        let server = server.clone();
        async move {
            let channel = server.accept().await.unwrap();
            loop {
                let frame = channel.receive_frame().await.unwrap();
                let last = frame.last;
                channel.send_frame(Frame::data(0, frame.payload, last)).await.unwrap();
                if last {
                    break;
                }
            }
        }
    });

    let client = peer_on(&registry).await;
    client.connect("inproc://ordering").await.unwrap();
    let channel = client.open("ordering", vec![], None).await.unwrap();

    for i in 0u8..10 {
        let last = i == 9;
        channel.send_frame(Frame::data(0, Bytes::copy_from_slice(&[i]), last)).await.unwrap();
    }

    for i in 0u8..10 {
        let frame = channel.receive_frame().await.unwrap();
        assert_eq!(frame.payload.as_ref(), &[i]);
        assert_eq!(frame.last, i == 9);
    }
    assert!(channel.receive_frame().await.is_none());

    server_task.await.unwrap();
}

#[compio::test]
async fn client_half_close_lets_server_keep_replying() {
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://half-close").await.unwrap();

    let server_task = compio::runtime::spawn({
        let server = server.clone();
        async move {
            let channel = server.accept().await.unwrap();
            let first = channel.receive_frame().await.unwrap();
            assert!(!first.last);
            let second = channel.receive_frame().await.unwrap();
            assert!(second.last);
            assert!(!channel.is_closed(), "server side stays open until it also sends last");

            channel.send_frame(Frame::data(0, Bytes::from_static(b"a"), false)).await.unwrap();
            channel.send_frame(Frame::data(0, Bytes::from_static(b"b"), true)).await.unwrap();
        }
    });

    let client = peer_on(&registry).await;
    client.connect("inproc://half-close").await.unwrap();
    let channel = client.open("half-close", vec![], None).await.unwrap();

    channel.send_frame(Frame::data(0, Bytes::from_static(b"x"), false)).await.unwrap();
    channel.send_frame(Frame::data(0, Bytes::from_static(b"y"), true)).await.unwrap();

    let first = channel.receive_frame().await.unwrap();
    assert_eq!(first.payload.as_ref(), b"a");
    assert!(!channel.is_closed(), "client hasn't seen a last-flagged frame yet");

    let second = channel.receive_frame().await.unwrap();
    assert_eq!(second.payload.as_ref(), b"b");
    assert!(channel.is_closed(), "receiving a last-flagged frame closes the client side");

    server_task.await.unwrap();
}

#[compio::test]
async fn round_robin_distributes_opens_across_connections() {
    let registry = Arc::new(InprocRegistry::new());
    let (tag_tx, tag_rx) = flume::unbounded::<&'static str>();

    async fn drain_one(peer: &Peer, tag: &'static str, tx: &flume::Sender<&'static str>) {
        let channel = peer.accept().await.unwrap();
        let _ = tx.send_async(tag).await;
        loop {
            match channel.receive_frame().await {
                Some(frame) if frame.last => break,
                Some(_) => continue,
                None => break,
            }
        }
    }

    let s1 = peer_on(&registry).await;
    s1.bind("inproc://rr-1").await.unwrap();
    let s2 = peer_on(&registry).await;
    s2.bind("inproc://rr-2").await.unwrap();

    let server_task = compio::runtime::spawn({
        let (s1, s2) = (s1.clone(), s2.clone());
        let tag_tx = tag_tx.clone();
        async move {
            futures::join!(drain_one(&s1, "s1", &tag_tx), drain_one(&s2, "s2", &tag_tx));
        }
    });

    let client = peer_on(&registry).await;
    client.connect("inproc://rr-1").await.unwrap();
    client.connect("inproc://rr-2").await.unwrap();

    for _ in 0..2 {
        let channel = client.open("tag", vec![], None).await.unwrap();
        channel.send_frame(Frame::data(0, Bytes::new(), true)).await.unwrap();
    }

    let mut tags = vec![tag_rx.recv_async().await.unwrap(), tag_rx.recv_async().await.unwrap()];
    tags.sort_unstable();
    assert_eq!(tags, vec!["s1", "s2"], "each of 2 connections sees exactly one of 2 opens");

    server_task.await.unwrap();
}

#[compio::test]
async fn targeted_open_pins_to_one_remote_peer() {
    let registry = Arc::new(InprocRegistry::new());
    let (tag_tx, tag_rx) = flume::unbounded::<&'static str>();

    let s1 = peer_on(&registry).await;
    s1.bind("inproc://target-1").await.unwrap();
    let s1_id = s1.id();
    let s2 = peer_on(&registry).await;
    s2.bind("inproc://target-2").await.unwrap();

    async fn drain_all(peer: Peer, tag: &'static str, tx: flume::Sender<&'static str>) {
        while let Some(channel) = peer.accept().await {
            let _ = tx.send_async(tag).await;
            loop {
                match channel.receive_frame().await {
                    Some(frame) if frame.last => break,
                    Some(_) => continue,
                    None => break,
                }
            }
        }
    }

    compio::runtime::spawn(drain_all(s1.clone(), "s1", tag_tx.clone())).detach();
    compio::runtime::spawn(drain_all(s2.clone(), "s2", tag_tx.clone())).detach();

    let client = peer_on(&registry).await;
    client.connect("inproc://target-1").await.unwrap();
    client.connect("inproc://target-2").await.unwrap();

    for _ in 0..3 {
        let channel = client.open("tag", vec![], Some(s1_id)).await.unwrap();
        channel.send_frame(Frame::data(0, Bytes::new(), true)).await.unwrap();
    }

    for _ in 0..3 {
        assert_eq!(tag_rx.recv_async().await.unwrap(), "s1");
    }
    assert!(tag_rx.try_recv().is_err(), "targeted opens must never land on the other remote");
}

#[compio::test]
async fn targeted_open_fails_locally_when_not_connected_to_that_remote() {
    use duplex_core::id::PeerId;
    let registry = Arc::new(InprocRegistry::new());

    let client = peer_on(&registry).await;
    let stranger = PeerId::generate();
    let err = client.open("tag", vec![], Some(stranger)).await.unwrap_err();
    assert!(matches!(err, duplex::DuplexError::NotFound(_)), "no connection to the target must fail synchronously, not via channel.error()");
}

#[compio::test]
async fn streaming_payloads_are_accumulated_then_answered_once() {
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://sum").await.unwrap();

    let server_task = compio::runtime::spawn({
        let server = server.clone();
        async move {
            let channel = server.accept().await.unwrap();
            let mut total: u64 = 0;
            loop {
                let frame = channel.receive_frame().await.unwrap();
                total += u64::from(frame.payload[0]);
                if frame.last {
                    break;
                }
            }
            channel.send_frame(Frame::data(0, Bytes::copy_from_slice(&[total as u8]), true)).await.unwrap();
        }
    });

    let client = peer_on(&registry).await;
    client.connect("inproc://sum").await.unwrap();
    let channel = client.open("sum", vec![], None).await.unwrap();

    let payloads = [9u8, 3, 3, 6, 9];
    for (i, byte) in payloads.iter().enumerate() {
        let last = i == payloads.len() - 1;
        channel.send_frame(Frame::data(0, Bytes::copy_from_slice(&[*byte]), last)).await.unwrap();
    }

    let reply = channel.receive_frame().await.unwrap();
    assert_eq!(reply.payload[0], payloads.iter().map(|b| *b as u32).sum::<u32>() as u8);
    assert!(reply.last);
    assert!(channel.receive_frame().await.is_none());

    server_task.await.unwrap();
}

#[compio::test]
async fn interrupted_by_server_surfaces_a_remote_error_after_partial_payloads() {
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://interrupt").await.unwrap();

    let server_task = compio::runtime::spawn({
        let server = server.clone();
        async move {
            let channel = server.accept().await.unwrap();
            for i in 0u8..30 {
                channel.send_frame(Frame::data(0, Bytes::copy_from_slice(&[i]), false)).await.unwrap();
            }
            channel.send_err("ran out of patience", false).await.unwrap();
        }
    });

    let client = peer_on(&registry).await;
    client.connect("inproc://interrupt").await.unwrap();
    let channel = client.open("interrupt", vec![], None).await.unwrap();
    channel.send_frame(Frame::data(0, Bytes::new(), true)).await.unwrap();

    for i in 0u8..30 {
        let frame = channel.receive_frame().await.unwrap();
        assert_eq!(frame.payload.as_ref(), &[i]);
        assert!(!frame.last);
    }

    assert!(channel.receive_frame().await.is_none(), "the error-frame terminates the channel rather than being delivered as data");
    assert!(channel.is_closed());
    match channel.error() {
        Some(err) => assert!(err.to_string().contains("ran out of patience")),
        None => panic!("expected a remote error"),
    }

    server_task.await.unwrap();
}

#[compio::test]
async fn interrupted_by_client_closes_the_server_side_channel() {
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://client-interrupt").await.unwrap();

    let server_task = compio::runtime::spawn({
        let server = server.clone();
        async move {
            let channel = server.accept().await.unwrap();
            // The client sends nothing further; the channel must still
            // observe the remote error rather than hanging forever.
            assert!(channel.receive_frame().await.is_none());
            assert!(channel.is_closed());
        }
    });

    let client = peer_on(&registry).await;
    client.connect("inproc://client-interrupt").await.unwrap();
    let channel = client.open("client-interrupt", vec![], None).await.unwrap();
    channel.send_err("client gave up", false).await.unwrap();

    server_task.await.unwrap();
}

#[compio::test]
async fn multiple_connections_to_the_same_remote_both_carry_channels() {
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://survive").await.unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let server_task = compio::runtime::spawn({
        let server = server.clone();
        let hits = Arc::clone(&hits);
        async move {
            for _ in 0..2 {
                let channel = server.accept().await.unwrap();
                let frame = channel.receive_frame().await.unwrap();
                hits.fetch_add(1, Ordering::SeqCst);
                channel.send_frame(Frame::data(0, frame.payload, true)).await.unwrap();
            }
        }
    });

    let client = peer_on(&registry).await;
    client.connect("inproc://survive").await.unwrap();
    client.connect("inproc://survive").await.unwrap();
    assert_eq!(client.peers().len(), 1, "both connections are to the same remote peer id");

    for _ in 0..2 {
        let channel = client.open("survive", vec![], None).await.unwrap();
        channel.send_frame(Frame::data(0, Bytes::from_static(b"ping"), true)).await.unwrap();
        let reply = channel.receive_frame().await.unwrap();
        assert_eq!(reply.payload.as_ref(), b"ping");
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    server_task.await.unwrap();
}

#[compio::test]
async fn shutdown_drains_pending_accept_and_fails_new_opens() {
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://shutdown").await.unwrap();

    let client = peer_on(&registry).await;
    client.connect("inproc://shutdown").await.unwrap();
    let opened = client.open("shutdown", vec![], None).await.unwrap();
    opened.send_frame(Frame::data(0, Bytes::new(), true)).await.unwrap();

    let accepted = server.accept().await.unwrap();
    assert_eq!(accepted.service(), "shutdown");

    server.shutdown().unwrap();
    assert!(server.accept().await.is_none(), "accept drains to None once shut down");
    assert!(matches!(server.shutdown().unwrap_err(), duplex::DuplexError::State(_)), "a second shutdown fails rather than no-op");

    client.shutdown().unwrap();
    let err = client.open("shutdown", vec![], None).await.unwrap_err();
    assert!(matches!(err, duplex::DuplexError::State(_)));
}

#[compio::test]
async fn greeting_is_required_before_a_connection_is_usable() {
    use duplex_core::id::PeerId;
    let registry = Arc::new(InprocRegistry::new());

    let server = peer_on(&registry).await;
    server.bind("inproc://greeting").await.unwrap();

    let client = peer_on(&registry).await;
    client.connect("inproc://greeting").await.unwrap();

    // By the time `connect` returns, the remote peer id is already known —
    // the handshake/greeting exchange is synchronous with connection setup,
    // never deferred to first use.
    let remote: PeerId = client.peers()[0];
    assert_ne!(remote, client.id());
    assert_eq!(remote, server.id());
}
