//! Replication over a real WebSocket connection.

use feedrelay_relay::{Feed, FeedKey, RelayServer, ServerConfig, KEY_LENGTH};
use futures::{SinkExt, Stream, StreamExt};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const GREETING: &[u8] = b"hello";

/// Greets each peer, then echoes what it sends.
#[derive(Default)]
struct EchoFeed {
    open: Arc<AtomicUsize>,
}

impl Feed for EchoFeed {
    type Stream = DuplexStream;

    fn key(&self) -> FeedKey {
        FeedKey::from_bytes([0x11; KEY_LENGTH])
    }

    fn replicate(&self, is_initiator: bool) -> io::Result<DuplexStream> {
        assert!(!is_initiator);
        let (ours, theirs) = tokio::io::duplex(1024);
        let open = Arc::clone(&self.open);
        open.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(theirs);
            if writer.write_all(GREETING).await.is_ok() {
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            }
            open.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(ours)
    }
}

/// Collects `len` bytes of binary payload, skipping control frames.
async fn recv<S>(ws: &mut S, len: usize) -> Vec<u8>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut got = Vec::new();
    while got.len() < len {
        match ws.next().await.unwrap().unwrap() {
            Message::Binary(bytes) => got.extend_from_slice(&bytes),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
    got
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn websocket_bridges_both_directions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let feed = Arc::new(EchoFeed::default());
    let open = Arc::clone(&feed.open);
    let server = RelayServer::new(ServerConfig::new(addr), feed);
    let relay = Arc::clone(server.relay());
    tokio::spawn(async move {
        server.serve_with_listener(listener).await.unwrap();
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();

    // Replication to remote.
    assert_eq!(recv(&mut ws, GREETING.len()).await, GREETING);
    assert_eq!(relay.active_connections(), 1);
    assert_eq!(open.load(Ordering::SeqCst), 1);

    // Remote to replication, and back out through the echo.
    ws.send(Message::binary(b"binary frame".to_vec())).await.unwrap();
    assert_eq!(recv(&mut ws, 12).await, b"binary frame");

    ws.send(Message::text("text frame".to_string())).await.unwrap();
    assert_eq!(recv(&mut ws, 10).await, b"text frame");

    ws.send(Message::Ping(b"still there".to_vec().into())).await.unwrap();
    ws.send(Message::binary(vec![0u8, 1, 2, 255])).await.unwrap();
    assert_eq!(recv(&mut ws, 4).await, [0, 1, 2, 255]);

    ws.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await
    .unwrap();

    wait_until(|| relay.active_connections() == 0 && open.load(Ordering::SeqCst) == 0).await;
}

#[tokio::test]
async fn each_websocket_gets_its_own_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let feed = Arc::new(EchoFeed::default());
    let open = Arc::clone(&feed.open);
    let server = RelayServer::new(ServerConfig::new(addr), feed);
    let relay = Arc::clone(server.relay());
    tokio::spawn(async move {
        server.serve_with_listener(listener).await.unwrap();
    });

    let url = format!("ws://{addr}/");
    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    assert_eq!(recv(&mut first, GREETING.len()).await, GREETING);
    assert_eq!(recv(&mut second, GREETING.len()).await, GREETING);
    assert_eq!(open.load(Ordering::SeqCst), 2);

    first.send(Message::binary(b"one".to_vec())).await.unwrap();
    second.send(Message::binary(b"two".to_vec())).await.unwrap();
    assert_eq!(recv(&mut second, 3).await, b"two");
    assert_eq!(recv(&mut first, 3).await, b"one");

    // Dropping one socket leaves the other bridged.
    drop(first);
    wait_until(|| relay.active_connections() == 1).await;
    second.send(Message::binary(b"again".to_vec())).await.unwrap();
    assert_eq!(recv(&mut second, 5).await, b"again");

    drop(second);
    wait_until(|| relay.active_connections() == 0 && open.load(Ordering::SeqCst) == 0).await;
}
