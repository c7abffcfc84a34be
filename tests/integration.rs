//! Integration tests for sockwire.
//!
//! These tests run servers and clients over loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use sockwire::codec::RawCodec;
use sockwire::protocol::FrameConfig;
use sockwire::{Client, ClientConfig, PeerId, Server, ServerConfig, SockwireError};

const WAIT: Duration = Duration::from_secs(5);
const GRACE: Duration = Duration::from_millis(500);

/// Everything a facade reports through its handlers.
#[derive(Debug, Clone, PartialEq)]
enum Event<V> {
    Connected(PeerId),
    Received(V, PeerId),
    Disconnected(PeerId),
}

fn server_config() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0).with_grace_period(GRACE)
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new("127.0.0.1", addr.port()).with_grace_period(GRACE)
}

fn record_server<C>(server: &Server<C>) -> UnboundedReceiver<Event<C::Value>>
where
    C: sockwire::codec::PayloadCodec,
{
    let (tx, rx) = unbounded_channel();
    let received = tx.clone();
    server.on_received(move |message, peer| {
        let tx = received.clone();
        async move {
            let _ = tx.send(Event::Received(message, peer));
            Ok(())
        }
    });
    let connected = tx.clone();
    server.on_connected(move |peer| {
        let tx = connected.clone();
        async move {
            let _ = tx.send(Event::Connected(peer));
            Ok(())
        }
    });
    server.on_disconnected(move |peer| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(Event::Disconnected(peer));
            Ok(())
        }
    });
    rx
}

fn record_client(client: &Client) -> UnboundedReceiver<Event<Value>> {
    let (tx, rx): (UnboundedSender<Event<Value>>, _) = unbounded_channel();
    let received = tx.clone();
    client.on_received(move |message, peer| {
        let tx = received.clone();
        async move {
            let _ = tx.send(Event::Received(message, peer));
            Ok(())
        }
    });
    let connected = tx.clone();
    client.on_connected(move |peer| {
        let tx = connected.clone();
        async move {
            let _ = tx.send(Event::Connected(peer));
            Ok(())
        }
    });
    client.on_disconnected(move |peer| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(Event::Disconnected(peer));
            Ok(())
        }
    });
    rx
}

async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert nothing arrives within a short window.
async fn quiet<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

/// Hand-built frame with the default wire format.
fn wire_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = format!("{}|", body.len() + 1).into_bytes();
    frame.resize(64, b' ');
    frame.extend_from_slice(body);
    frame.push(b'|');
    frame
}

async fn connect_client(addr: SocketAddr) -> (Client, UnboundedReceiver<Event<Value>>, PeerId) {
    let client = Client::new(client_config(addr)).unwrap();
    let mut events = record_client(&client);
    client.connect().await.unwrap();
    let id = PeerId::new(client.local_addr().unwrap());
    assert_eq!(next(&mut events).await, Event::Connected(PeerId::new(addr)));
    (client, events, id)
}

#[tokio::test]
async fn test_connect_send_stop_scenario() {
    let server = Server::new(server_config()).unwrap();
    let mut server_events = record_server(&server);
    let addr = server.start().await.unwrap();

    let client = Client::new(client_config(addr)).unwrap();
    let mut client_events = record_client(&client);
    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.server_addr(), Some(addr));

    let client_id = PeerId::new(client.local_addr().unwrap());
    assert_eq!(next(&mut server_events).await, Event::Connected(client_id));
    assert_eq!(server.get_all_clients(), vec![client_id]);

    client.send(&json!({"x": 1})).await.unwrap();
    assert_eq!(
        next(&mut server_events).await,
        Event::Received(json!({"x": 1}), client_id)
    );

    server.stop().await;
    assert_eq!(next(&mut client_events).await, Event::Connected(PeerId::new(addr)));
    assert_eq!(next(&mut client_events).await, Event::Disconnected(PeerId::new(addr)));
    assert_eq!(next(&mut server_events).await, Event::Disconnected(client_id));

    assert!(server.get_all_clients().is_empty());
    assert!(!server.is_active());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_server_to_client_message() {
    let server = Server::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();
    let (client, mut events, id) = connect_client(addr).await;

    let position = json!({"player": {"player1": [500, 30], "player2": [352, 103]}});
    let sent = server.send(&position, &[]).await.unwrap();
    assert_eq!(sent, vec![id]);
    assert_eq!(
        next(&mut events).await,
        Event::Received(position, PeerId::new(addr))
    );

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_broadcast_and_targeted_send() {
    let server = Server::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();

    let (_a, mut a_events, a_id) = connect_client(addr).await;
    let (_b, mut b_events, b_id) = connect_client(addr).await;

    let mut expected = vec![a_id, b_id];
    expected.sort();
    let sent = server.send(&json!("all"), &[]).await.unwrap();
    assert_eq!(sent, expected);
    assert_eq!(server.get_all_clients(), expected);

    let server_id = PeerId::new(addr);
    assert_eq!(next(&mut a_events).await, Event::Received(json!("all"), server_id));
    assert_eq!(next(&mut b_events).await, Event::Received(json!("all"), server_id));

    let sent = server.send(&json!("only a"), &[a_id]).await.unwrap();
    assert_eq!(sent, vec![a_id]);
    assert_eq!(next(&mut a_events).await, Event::Received(json!("only a"), server_id));
    quiet(&mut b_events).await;

    let stranger = PeerId::new("127.0.0.1:1".parse().unwrap());
    assert!(server.send(&json!("nobody"), &[stranger]).await.unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_removes_session() {
    let server = Server::new(server_config()).unwrap();
    let mut server_events = record_server(&server);
    let addr = server.start().await.unwrap();

    let (client, mut client_events, id) = connect_client(addr).await;
    assert_eq!(next(&mut server_events).await, Event::Connected(id));

    client.disconnect().await;
    assert!(!client.is_connected());
    assert_eq!(next(&mut client_events).await, Event::Disconnected(PeerId::new(addr)));
    assert_eq!(next(&mut server_events).await, Event::Disconnected(id));

    // Teardown removes the session before the disconnected event is queued.
    assert!(server.get_all_clients().is_empty());
    assert!(matches!(
        client.send(&json!(1)).await,
        Err(SockwireError::NotConnected)
    ));

    server.stop().await;
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let server = Server::new(server_config()).unwrap();
    let mut server_events = record_server(&server);
    let addr = server.start().await.unwrap();

    let (client, mut client_events, id) = connect_client(addr).await;
    assert_eq!(next(&mut server_events).await, Event::Connected(id));

    server.stop().await;
    server.stop().await;
    client.disconnect().await;
    client.disconnect().await;

    assert_eq!(next(&mut client_events).await, Event::Disconnected(PeerId::new(addr)));
    assert_eq!(next(&mut server_events).await, Event::Disconnected(id));
    quiet(&mut client_events).await;
    quiet(&mut server_events).await;
}

#[tokio::test]
async fn test_dropping_running_server_closes_sessions() {
    let server = Server::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();
    let (client, mut events, _id) = connect_client(addr).await;

    drop(server);

    assert_eq!(next(&mut events).await, Event::Disconnected(PeerId::new(addr)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_client_can_reconnect() {
    let server = Server::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();

    let client = Client::new(client_config(addr)).unwrap();
    client.connect().await.unwrap();
    assert!(matches!(
        client.connect().await,
        Err(SockwireError::AlreadyRunning)
    ));

    client.disconnect().await;
    client.connect().await.unwrap();
    assert!(client.is_connected());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_connect_opens_one_session() {
    let server = Server::new(server_config()).unwrap();
    let mut server_events = record_server(&server);
    let addr = server.start().await.unwrap();

    let client = Client::new(client_config(addr)).unwrap();
    let (first, second) = tokio::join!(client.connect(), client.connect());

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(SockwireError::AlreadyRunning))));

    let id = PeerId::new(client.local_addr().unwrap());
    assert_eq!(next(&mut server_events).await, Event::Connected(id));
    quiet(&mut server_events).await;
    assert_eq!(server.get_all_clients(), vec![id]);

    client.disconnect().await;
    assert_eq!(next(&mut server_events).await, Event::Disconnected(id));
    assert!(server.get_all_clients().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_sentinel_precedes_codec() {
    // A raw-bytes server would otherwise hand the sentinel to handlers.
    let server = Server::with_codec(server_config(), RawCodec).unwrap();
    let mut events = record_server(&server);
    let addr = server.start().await.unwrap();

    let mut socket = TcpStream::connect(addr).await.unwrap();
    let id = PeerId::new(socket.local_addr().unwrap());
    assert_eq!(next(&mut events).await, Event::Connected(id));

    socket.write_all(&wire_frame(b"payload")).await.unwrap();
    assert_eq!(
        next(&mut events).await,
        Event::Received(Bytes::from_static(b"payload"), id)
    );

    socket.write_all(&wire_frame(b"!DISCONNECT")).await.unwrap();
    assert_eq!(next(&mut events).await, Event::Disconnected(id));

    // The server closes its end without replying.
    let mut rest = Vec::new();
    socket.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert!(server.get_all_clients().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_frames_keep_session() {
    let server = Server::new(server_config()).unwrap();
    let mut events = record_server(&server);
    let addr = server.start().await.unwrap();

    let mut socket = TcpStream::connect(addr).await.unwrap();
    let id = PeerId::new(socket.local_addr().unwrap());
    assert_eq!(next(&mut events).await, Event::Connected(id));

    // Non-numeric length field.
    let mut bad_header = b"abc|".to_vec();
    bad_header.resize(64, b' ');
    socket.write_all(&bad_header).await.unwrap();

    // Empty length field.
    let mut empty_header = b"|".to_vec();
    empty_header.resize(64, b' ');
    socket.write_all(&empty_header).await.unwrap();

    // Body that is not JSON.
    socket.write_all(&wire_frame(b"{oops")).await.unwrap();

    socket.write_all(&wire_frame(br#"{"ok":true}"#)).await.unwrap();
    assert_eq!(
        next(&mut events).await,
        Event::Received(json!({"ok": true}), id)
    );
    assert_eq!(server.get_all_clients(), vec![id]);

    server.stop().await;
}

#[tokio::test]
async fn test_fragmented_frame() {
    let server = Server::new(server_config()).unwrap();
    let mut events = record_server(&server);
    let addr = server.start().await.unwrap();

    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.set_nodelay(true).unwrap();
    let id = PeerId::new(socket.local_addr().unwrap());
    assert_eq!(next(&mut events).await, Event::Connected(id));

    let frame = wire_frame(br#"[1,2,3]"#);
    for chunk in frame.chunks(5) {
        socket.write_all(chunk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(next(&mut events).await, Event::Received(json!([1, 2, 3]), id));
    server.stop().await;
}

#[tokio::test]
async fn test_wire_format_on_socket() {
    let server = Server::new(server_config()).unwrap();
    let mut events = record_server(&server);
    let addr = server.start().await.unwrap();

    let mut socket = TcpStream::connect(addr).await.unwrap();
    let id = PeerId::new(socket.local_addr().unwrap());
    assert_eq!(next(&mut events).await, Event::Connected(id));

    server.send(&json!({"x": 1}), &[id]).await.unwrap();

    let mut frame = vec![0u8; 64 + 8];
    socket.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame, wire_frame(br#"{"x":1}"#));
    assert_eq!(&frame[..4], b"8|  ");

    server.stop().await;

    // Stopping sends the sentinel before closing.
    let mut rest = Vec::new();
    socket.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, wire_frame(b"!DISCONNECT"));
}

#[tokio::test]
async fn test_custom_terminator() {
    let frame = FrameConfig::default().with_terminator("#").unwrap();
    let server = Server::new(server_config().with_frame(frame)).unwrap();
    let mut server_events = record_server(&server);
    let addr = server.start().await.unwrap();

    let client = Client::new(client_config(addr).with_frame(frame)).unwrap();
    let mut client_events = record_client(&client);
    client.connect().await.unwrap();
    let id = PeerId::new(client.local_addr().unwrap());
    assert_eq!(next(&mut server_events).await, Event::Connected(id));

    // '|' is ordinary payload under a '#' terminator.
    client.send(&json!("a|b")).await.unwrap();
    assert_eq!(next(&mut server_events).await, Event::Received(json!("a|b"), id));

    assert!(matches!(
        client.send(&json!("a#b")).await,
        Err(SockwireError::TerminatorInPayload { terminator: b'#' })
    ));

    server.send(&json!("pong"), &[]).await.unwrap();
    assert_eq!(next(&mut client_events).await, Event::Connected(PeerId::new(addr)));
    assert_eq!(
        next(&mut client_events).await,
        Event::Received(json!("pong"), PeerId::new(addr))
    );

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_sends_do_not_interleave() {
    let server = Server::new(server_config()).unwrap();
    let mut events = record_server(&server);
    let addr = server.start().await.unwrap();

    let client = std::sync::Arc::new(Client::new(client_config(addr)).unwrap());
    client.connect().await.unwrap();
    let id = PeerId::new(client.local_addr().unwrap());
    assert_eq!(next(&mut events).await, Event::Connected(id));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..50 {
        let client = client.clone();
        tasks.spawn(async move { client.send(&json!({"seq": i, "pad": "x".repeat(i * 40)})).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..50 {
        match next(&mut events).await {
            Event::Received(message, peer) => {
                assert_eq!(peer, id);
                seen.push(message["seq"].as_u64().unwrap());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..50).collect::<Vec<u64>>());

    client.disconnect().await;
    server.stop().await;
}
