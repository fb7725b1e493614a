//! Relay integration tests
//!
//! Exercise the full server over real loopback TCP: broadcast fan-out,
//! dead-peer reaping, the inbound hook, and shutdown behavior.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use qzrelay::protocol::encode_message;
use qzrelay::relay::ListenerPhase;
use qzrelay::{Config, RelayServer};

fn test_config() -> Arc<Config> {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.discovery.enabled = false;
    Arc::new(config)
}

async fn start_server() -> Arc<RelayServer> {
    let server = RelayServer::new(test_config());
    server.start().expect("server starts");
    server
}

async fn connect(server: &RelayServer) -> TcpStream {
    TcpStream::connect(server.local_addr().unwrap())
        .await
        .expect("peer connects")
}

/// Poll until the server sees `n` connections and they have settled
async fn wait_for_count(server: &RelayServer, n: usize) {
    let deadline = Duration::from_secs(2);
    timeout(deadline, async {
        while server.connection_count() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {} connections, saw {}",
            n,
            server.connection_count()
        )
    });
    // Let freshly accepted connections reach the ready phase
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn read_frame(stream: &mut TcpStream) -> String {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    String::from_utf8(payload).unwrap()
}

#[tokio::test]
async fn test_broadcast_reaches_three_peers_exactly_once() {
    let server = start_server().await;

    let mut peers = Vec::new();
    for _ in 0..3 {
        peers.push(connect(&server).await);
    }
    wait_for_count(&server, 3).await;

    assert_eq!(server.broadcast("ping"), 3);

    for peer in &mut peers {
        let msg = timeout(Duration::from_secs(2), read_frame(peer))
            .await
            .expect("peer received broadcast");
        assert_eq!(msg, "ping");
    }

    // No duplicate delivery
    let mut probe = [0u8; 1];
    let extra = timeout(Duration::from_millis(200), peers[0].read(&mut probe)).await;
    assert!(extra.is_err(), "peer received unexpected extra bytes");

    server.shutdown();
}

#[tokio::test]
async fn test_dropped_peer_is_reaped_and_broadcast_survives() {
    let server = start_server().await;

    let peer = connect(&server).await;
    wait_for_count(&server, 1).await;

    drop(peer);
    wait_for_count(&server, 0).await;

    assert_eq!(server.broadcast("after the fall"), 0);
    server.shutdown();
}

#[tokio::test]
async fn test_peer_message_reaches_inbound_hook() {
    let server = start_server().await;
    let mut inbound = server.take_inbound().unwrap();

    let mut peer = connect(&server).await;
    wait_for_count(&server, 1).await;

    peer.write_all(&encode_message("hello")).await.unwrap();

    let msg = timeout(Duration::from_secs(2), inbound.recv())
        .await
        .expect("inbound delivered")
        .unwrap();
    assert_eq!(msg.text, "hello");

    server.shutdown();
}

#[tokio::test]
async fn test_message_with_embedded_newline_survives() {
    let server = start_server().await;

    let mut peer = connect(&server).await;
    wait_for_count(&server, 1).await;

    assert_eq!(server.broadcast("a\nb"), 1);
    let msg = timeout(Duration::from_secs(2), read_frame(&mut peer))
        .await
        .expect("peer received broadcast");
    assert_eq!(msg, "a\nb");

    server.shutdown();
}

#[tokio::test]
async fn test_malformed_frame_fails_only_that_peer() {
    let server = start_server().await;

    let mut bad_peer = connect(&server).await;
    let mut good_peer = connect(&server).await;
    wait_for_count(&server, 2).await;

    // Length prefix far beyond max_frame_len
    bad_peer.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    wait_for_count(&server, 1).await;

    assert_eq!(server.broadcast("still here"), 1);
    let msg = timeout(Duration::from_secs(2), read_frame(&mut good_peer))
        .await
        .expect("surviving peer received broadcast");
    assert_eq!(msg, "still here");

    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_disconnects_peers_and_is_idempotent() {
    let server = start_server().await;

    let mut peer = connect(&server).await;
    wait_for_count(&server, 1).await;

    server.shutdown();
    server.shutdown();

    assert_eq!(server.listener_phase(), ListenerPhase::Stopped);
    assert_eq!(server.connection_count(), 0);

    // Peer observes the close
    let mut probe = [0u8; 1];
    let n = timeout(Duration::from_secs(2), peer.read(&mut probe))
        .await
        .expect("peer read returned")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_capacity_rejects_excess_peers() {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.discovery.enabled = false;
    config.transport.max_connections = 1;
    let server = RelayServer::new(Arc::new(config));
    server.start().unwrap();

    let _first = connect(&server).await;
    wait_for_count(&server, 1).await;

    let _second = connect(&server).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);

    assert_eq!(server.broadcast("only one"), 1);
    server.shutdown();
}
