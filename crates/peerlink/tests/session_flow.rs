//! Integration tests: real hosts and clients talking over 127.0.0.1.
//!
//! Each test picks its own free ports so tests can run in parallel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use peerlink::prelude::*;
use peerlink::session::SessionError;
use peerlink::transport::TransportError;
use peerlink::ACCEPT_TOPIC;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

// =========================================================================
// Helpers
// =========================================================================

fn free_tcp_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn free_udp_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// A loopback config with ephemeral UDP ports on both ends.
fn config(port: u16) -> NetConfig {
    NetConfig::default()
        .with_bind_address("127.0.0.1")
        .with_target("127.0.0.1", port)
        .with_udp_ports(0, 0)
}

async fn start_host(port: u16) -> NetworkManager {
    let mut host = NetworkManager::new(config(port));
    host.host().await.expect("host should start");
    host
}

/// Polls `cond` until it holds, failing the test after five seconds.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Waits for the next raw inbound message.
async fn next_message<B: EventBus>(net: &mut NetworkManager<B>) -> String {
    let mut message = None;
    wait_until(|| {
        message = net.poll_message();
        message.is_some()
    })
    .await;
    message.unwrap()
}

/// Joins `port` and completes the handshake.
async fn join_and_handshake(port: u16) -> NetworkManager {
    let mut client = NetworkManager::new(config(port));
    client.join().await.expect("join should succeed");
    wait_until(|| {
        client.poll_events();
        client.assigned_id().is_some()
    })
    .await;
    client
}

// =========================================================================
// Session establishment
// =========================================================================

#[tokio::test]
async fn test_join_before_host_fails_then_succeeds() {
    let port = free_tcp_port();

    let mut client = NetworkManager::new(config(port));
    let result = client.join().await;
    assert!(matches!(
        result,
        Err(PeerlinkError::Transport(TransportError::ConnectFailed { .. }))
    ));
    assert_eq!(client.phase(), Phase::Idle);
    assert_eq!(client.bus().subscriber_count(ACCEPT_TOPIC), 0);

    let host = start_host(port).await;
    assert!(host.is_host());
    assert_eq!(host.assigned_id(), Some(NetId::HOST));

    client.join().await.expect("second join should succeed");
    assert_eq!(client.role(), Some(Role::Client));
    assert_eq!(client.phase(), Phase::Lobby);
    assert!(client.is_connected());

    let accept = next_message(&mut client).await;
    assert_eq!(accept, "[{key:ACCEPT,netID:0,myNetID:1}]");

    assert_eq!(client.assigned_id(), None);
    assert_eq!(client.dispatch(&accept), 1);
    assert_eq!(client.assigned_id(), Some(NetId(1)));
    assert!(client.is_self(NetId(1)));
    assert_eq!(client.bus().subscriber_count(ACCEPT_TOPIC), 0);
}

#[tokio::test]
async fn test_hosting_twice_fails() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;

    let result = host.host().await;
    assert!(matches!(
        result,
        Err(PeerlinkError::Session(SessionError::AlreadyActive(Phase::Lobby)))
    ));
    assert!(host.is_connected());
}

#[tokio::test]
async fn test_host_on_busy_port_leaves_session_idle() {
    let port = free_tcp_port();
    let _first = start_host(port).await;

    let mut second = NetworkManager::new(config(port));
    let result = second.host().await;
    assert!(matches!(
        result,
        Err(PeerlinkError::Transport(TransportError::BindFailed { .. }))
    ));
    assert_eq!(second.phase(), Phase::Idle);
    assert_eq!(second.player_count(), 0);
    assert!(second.udp_local_addr().is_none());
}

#[tokio::test]
async fn test_join_while_in_lobby_fails() {
    let port = free_tcp_port();
    let _host = start_host(port).await;
    let mut client = join_and_handshake(port).await;

    let result = client.join().await;
    assert!(matches!(
        result,
        Err(PeerlinkError::Session(SessionError::AlreadyActive(_)))
    ));
}

#[tokio::test]
async fn test_handshake_watch_sees_assigned_id() {
    let port = free_tcp_port();
    let _host = start_host(port).await;

    let mut client = NetworkManager::new(config(port));
    let mut watch = client.handshake_watch();
    client.join().await.unwrap();

    wait_until(|| {
        client.poll_events();
        watch.has_changed().unwrap_or(false)
    })
    .await;
    assert_eq!(*watch.borrow_and_update(), Some(NetId(1)));
}

// =========================================================================
// Start
// =========================================================================

#[tokio::test]
async fn test_start_game_transitions_and_roles() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    let mut client = join_and_handshake(port).await;

    assert!(matches!(
        client.start_game(),
        Err(PeerlinkError::Session(SessionError::WrongRole { .. }))
    ));
    assert!(matches!(
        host.start_game_client(),
        Err(PeerlinkError::Session(SessionError::WrongRole { .. }))
    ));

    host.start_game().unwrap();
    client.start_game_client().unwrap();
    assert_eq!(host.phase(), Phase::Started);
    assert_eq!(client.phase(), Phase::Started);

    assert!(matches!(
        host.start_game(),
        Err(PeerlinkError::Session(SessionError::NotInLobby(Phase::Started)))
    ));
}

#[tokio::test]
async fn test_started_host_stops_accepting() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    host.start_game().unwrap();

    let mut refused = false;
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refused, "listener should close once the game starts");
    assert_eq!(host.player_count(), 1);
}

// =========================================================================
// Outbound batching
// =========================================================================

#[tokio::test]
async fn test_empty_flush_sends_nothing() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    let mut client = join_and_handshake(port).await;

    let report = host.flush().await;
    assert_eq!(report, FlushReport::default());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.poll_message(), None);
}

#[tokio::test]
async fn test_two_clients_each_get_one_packet_with_both_records() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    let mut a = join_and_handshake(port).await;
    let mut b = join_and_handshake(port).await;
    assert_eq!(a.assigned_id(), Some(NetId(1)));
    assert_eq!(b.assigned_id(), Some(NetId(2)));
    wait_until(|| host.player_count() == 3).await;

    host.prepare_tcp(Event::new(NetId::HOST, "Spawn").with("kind", "orc"))
        .unwrap();
    host.prepare_tcp(Event::new(NetId::HOST, "Chat").with("text", "go"))
        .unwrap();
    assert_eq!(host.pending_tcp(), 2);

    let report = host.flush().await;
    assert_eq!(report.tcp_packets, 2);
    assert_eq!(host.pending_tcp(), 0);

    let expected = "[{key:Spawn,netID:0,kind:orc},{key:Chat,netID:0,text:go}]";
    assert_eq!(next_message(&mut a).await, expected);
    assert_eq!(next_message(&mut b).await, expected);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.poll_message(), None);
    assert_eq!(b.poll_message(), None);
    assert_eq!(host.poll_message(), None);
}

#[tokio::test]
async fn test_tombstoned_player_is_skipped_and_compacted() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    let mut gone = join_and_handshake(port).await;
    let mut stays = join_and_handshake(port).await;
    wait_until(|| host.player_count() == 3).await;

    assert!(host.remove_player(NetId(1)));
    assert_eq!(host.player_ids(), vec![NetId(0), NetId(2)]);

    host.prepare_tcp(Event::new(NetId::HOST, "Tick")).unwrap();
    let report = host.flush().await;
    assert_eq!(report.tcp_packets, 1);
    assert!(!host.remove_player(NetId(1)), "record should be compacted");

    assert_eq!(next_message(&mut stays).await, "[{key:Tick,netID:0}]");
    wait_until(|| !gone.is_connected()).await;
    assert_eq!(gone.poll_message(), None);
}

#[tokio::test]
async fn test_client_sends_to_host_only() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    let mut client = join_and_handshake(port).await;

    let chats = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&chats);
    host.bus().subscribe(
        "1|Chat",
        Arc::new(move |ev: &Event| {
            assert_eq!(ev.get("text").and_then(|v| v.as_str()), Some("hello"));
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    client
        .prepare_tcp(Event::new(NetId(1), "Chat").with("text", "hello"))
        .unwrap();
    let report = client.flush().await;
    assert_eq!(report.tcp_packets, 1);

    wait_until(|| {
        host.poll_events();
        chats.load(Ordering::SeqCst) == 1
    })
    .await;
}

#[tokio::test]
async fn test_prepare_rejects_reserved_characters() {
    let mut net = NetworkManager::default();
    let result = net.prepare_tcp(Event::new(NetId(1), "Chat").with("text", "a:b"));
    assert!(matches!(result, Err(PeerlinkError::Protocol(_))));
    assert_eq!(net.pending_tcp(), 0);

    net.prepare(Delivery::Unreliable, Event::new(NetId(1), "Pos").with("x", 1))
        .unwrap();
    assert_eq!(net.pending_udp(), 1);
}

// =========================================================================
// UDP
// =========================================================================

#[tokio::test]
async fn test_udp_both_directions() {
    let port = free_tcp_port();
    let host_udp = free_udp_port();
    let client_udp = free_udp_port();

    let mut host = NetworkManager::new(config(port).with_udp_ports(host_udp, client_udp));
    host.host().await.unwrap();

    let mut client = NetworkManager::new(config(port).with_udp_ports(client_udp, host_udp));
    client.join().await.unwrap();
    wait_until(|| {
        client.poll_events();
        client.assigned_id().is_some()
    })
    .await;
    assert_eq!(host.udp_channels().len(), 1);

    host.prepare_udp(Event::new(NetId::HOST, "Pos").with("x", 1.5))
        .unwrap();
    let report = host.flush().await;
    assert_eq!(report.udp_packets, 1);
    assert_eq!(report.tcp_packets, 0);
    assert_eq!(next_message(&mut client).await, "[{key:Pos,netID:0,x:1.500000}]");

    client
        .prepare_udp(Event::new(NetId(1), "Pos").with("y", -2))
        .unwrap();
    let report = client.flush().await;
    assert_eq!(report.udp_packets, 1);
    assert_eq!(next_message(&mut host).await, "[{key:Pos,netID:1,y:-2}]");
}

#[tokio::test]
async fn test_udp_reaches_players_beyond_channel_slots() {
    let port = free_tcp_port();
    let sink = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sink_port = sink.local_addr().unwrap().port();

    let mut host = NetworkManager::new(config(port).with_udp_ports(0, sink_port));
    host.host().await.unwrap();

    let mut peers = Vec::new();
    for _ in 0..5 {
        peers.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
    }
    wait_until(|| host.player_count() == 6).await;
    assert_eq!(host.udp_channels().len(), 4);

    host.prepare_udp(Event::new(NetId::HOST, "Tick").with("n", 1))
        .unwrap();
    let report = host.flush().await;
    assert_eq!(report.udp_packets, 5);

    let mut buf = [0u8; 256];
    for _ in 0..5 {
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), sink.recv_from(&mut buf))
            .await
            .expect("every player should get the datagram")
            .unwrap();
        assert_eq!(&buf[..n], b"[{key:Tick,netID:0,n:1}]");
    }
}

#[tokio::test]
async fn test_udp_flush_after_close_sends_nothing() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;

    host.close_udp();
    host.close_udp();
    assert!(host.udp_local_addr().is_none());

    host.prepare_udp(Event::new(NetId::HOST, "Pos")).unwrap();
    assert_eq!(host.send_queued_events().await.udp_packets, 0);
    assert_eq!(host.pending_udp(), 0);
}

// =========================================================================
// Capacity, kick, close, reset
// =========================================================================

#[tokio::test]
async fn test_seventeenth_connection_is_rejected() {
    let port = free_tcp_port();
    let host = start_host(port).await;

    let mut peers = Vec::new();
    for _ in 0..15 {
        peers.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
    }
    wait_until(|| host.player_count() == 16).await;

    let mut extra = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), extra.read(&mut buf))
        .await
        .expect("rejected socket should close")
        .unwrap_or(0);
    assert_eq!(n, 0, "rejected socket gets no handshake");

    assert_eq!(host.player_count(), 16);
    assert!(!host.player_ids().contains(&NetId(16)));
}

#[tokio::test]
async fn test_freed_slot_is_reused_after_compaction() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    let first = join_and_handshake(port).await;
    let _second = join_and_handshake(port).await;

    drop(first);
    wait_until(|| host.player_count() == 2).await;

    let third = join_and_handshake(port).await;
    assert_eq!(third.assigned_id(), Some(NetId(1)));
    host.close_client();
}

#[tokio::test]
async fn test_kick_disconnects_player() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    let mut client = join_and_handshake(port).await;
    wait_until(|| host.player_count() == 2).await;

    assert!(matches!(
        host.kick(NetId::HOST),
        Err(PeerlinkError::Session(SessionError::UnknownPlayer(_)))
    ));
    assert!(matches!(
        client.kick(NetId(0)),
        Err(PeerlinkError::Session(SessionError::WrongRole { .. }))
    ));

    host.kick(NetId(1)).unwrap();
    assert_eq!(host.player_ids(), vec![NetId::HOST]);
    assert!(host.udp_channels().is_empty());
    assert!(host.kick(NetId(1)).is_err());

    wait_until(|| !client.is_connected()).await;
}

#[tokio::test]
async fn test_client_sees_host_going_away() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    let client = join_and_handshake(port).await;

    host.close_client();
    host.close_client();
    assert!(!host.is_connected());
    assert_eq!(host.player_count(), 0);

    wait_until(|| !client.is_connected()).await;
    assert_eq!(client.player_count(), 0);
}

#[tokio::test]
async fn test_reset_allows_hosting_again() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;
    host.prepare_tcp(Event::new(NetId::HOST, "Left")).unwrap();

    host.reset().await;
    assert_eq!(host.phase(), Phase::Idle);
    assert_eq!(host.role(), None);
    assert_eq!(host.assigned_id(), None);
    assert_eq!(host.pending_tcp(), 0);
    assert!(!host.is_connected());

    host.host().await.expect("host after reset");
    let client = join_and_handshake(port).await;
    assert_eq!(client.assigned_id(), Some(NetId(1)));
}

#[tokio::test]
async fn test_reset_returns_while_peers_never_read() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;

    let mut idle = Vec::new();
    for _ in 0..3 {
        idle.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
    }
    wait_until(|| host.player_count() == 4).await;

    tokio::time::timeout(Duration::from_secs(5), host.reset())
        .await
        .expect("reset should not wait on silent peers");
    assert_eq!(host.player_count(), 0);
    assert_eq!(host.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_reset_removes_pending_handshake() {
    let port = free_tcp_port();
    let _host = start_host(port).await;
    let bus = Arc::new(LocalBus::new());

    let mut client = NetworkManager::with_bus(config(port), Arc::clone(&bus));
    client.join().await.unwrap();
    assert_eq!(bus.subscriber_count(ACCEPT_TOPIC), 1);

    client.reset().await;
    assert_eq!(bus.subscriber_count(ACCEPT_TOPIC), 0);
    assert_eq!(client.poll_message(), None);
}

// =========================================================================
// Pump
// =========================================================================

#[tokio::test]
async fn test_pump_dispatches_then_flushes() {
    let port = free_tcp_port();
    let mut host = start_host(port).await;

    let mut client = NetworkManager::new(config(port));
    client.join().await.unwrap();
    client
        .prepare_tcp(Event::new(NetId(1), "Ready"))
        .unwrap();

    // Queued before the handshake, sent on the first pump after it.
    let accept = next_message(&mut client).await;
    assert_eq!(client.dispatch(&accept), 1);
    assert_eq!(client.assigned_id(), Some(NetId(1)));

    let report = client.pump().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.flushed.tcp_packets, 1);

    let ready = next_message(&mut host).await;
    assert_eq!(ready, "[{key:Ready,netID:1}]");
}
