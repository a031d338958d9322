//! Bridging replication streams to remote transports.
//!
//! One connection moves through four states:
//!
//! 1. **Init**: a fresh responder-mode replication stream is opened
//! 2. **Bridging**: bytes are pumped in both directions concurrently; each
//!    pump awaits its destination before reading more, so a slow consumer
//!    stalls its producer instead of growing a buffer
//! 3. **Teardown**: as soon as either pump ends (end of stream, close or
//!    error) the other is dropped and both ends are closed
//! 4. **Terminal**: the connection is gone; nothing is retried

use crate::error::{RelayError, RelayResult};
use crate::feed::Feed;
use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Which side ended a bridged connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    /// The local replication stream ended or failed.
    Replication,
    /// The remote transport ended or failed.
    Transport,
}

/// Byte counts of a finished bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Bytes copied from the replication stream to the transport.
    pub sent: u64,
    /// Bytes copied from the transport to the replication stream.
    pub received: u64,
    /// The side whose end triggered teardown.
    pub closed_by: ClosedBy,
}

/// Copies replication bytes out to the transport until the stream ends.
async fn pump_out<R, T>(
    reader: &mut R,
    sink: &mut T,
    max_chunk: usize,
    sent: &AtomicU64,
) -> RelayResult<()>
where
    R: AsyncRead + Unpin,
    T: Sink<Bytes, Error = RelayError> + Unpin,
{
    let mut buf = BytesMut::with_capacity(max_chunk);
    loop {
        buf.reserve(max_chunk);
        let n = (&mut *reader)
            .take(max_chunk as u64)
            .read_buf(&mut buf)
            .await?;
        if n == 0 {
            return Ok(());
        }
        sink.send(buf.split().freeze()).await?;
        sent.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Copies transport messages into the replication stream until it ends.
async fn pump_in<W, S>(writer: &mut W, stream: &mut S, received: &AtomicU64) -> RelayResult<()>
where
    W: AsyncWrite + Unpin,
    S: Stream<Item = RelayResult<Bytes>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let bytes = message?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
    }
    Ok(())
}

/// Splices `replication` and `transport` until either side ends.
///
/// Both ends are closed before this returns, whichever side triggered the
/// teardown. Errors raised while closing are logged and do not replace the
/// triggering outcome.
///
/// # Errors
///
/// Returns the error that ended the connection, if any.
pub async fn bridge<R, T>(
    conn_id: u64,
    replication: R,
    transport: T,
    max_chunk: usize,
) -> RelayResult<BridgeStats>
where
    R: AsyncRead + AsyncWrite + Unpin,
    T: Stream<Item = RelayResult<Bytes>> + Sink<Bytes, Error = RelayError> + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(replication);
    let (mut sink, mut stream) = transport.split::<Bytes>();
    let sent = AtomicU64::new(0);
    let received = AtomicU64::new(0);

    let (closed_by, outcome) = tokio::select! {
        result = pump_out(&mut reader, &mut sink, max_chunk.max(1), &sent) => {
            (ClosedBy::Replication, result)
        }
        result = pump_in(&mut writer, &mut stream, &received) => {
            (ClosedBy::Transport, result)
        }
    };

    if let Err(e) = sink.close().await {
        debug!(conn_id, error = %e, "transport close failed");
    }
    if let Err(e) = writer.shutdown().await {
        debug!(conn_id, error = %e, "replication shutdown failed");
    }
    drop((reader, writer, sink, stream));

    outcome.map(|()| BridgeStats {
        sent: sent.load(Ordering::Relaxed),
        received: received.load(Ordering::Relaxed),
        closed_by,
    })
}

/// Relays replication streams of one feed to inbound connections.
///
/// Connections are independent: each gets its own replication stream and
/// its own bridge, and a fault in one is logged and contained.
pub struct Relay<L> {
    feed: Arc<L>,
    max_chunk: usize,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl<L: Feed> Relay<L> {
    /// Creates a relay for `feed`.
    pub fn new(feed: Arc<L>, max_chunk: usize) -> Self {
        Self {
            feed,
            max_chunk,
            next_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The relayed feed.
    pub fn feed(&self) -> &Arc<L> {
        &self.feed
    }

    /// Number of connections currently being bridged.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Runs one inbound connection to completion.
    ///
    /// Opens a responder-mode replication stream and bridges it with
    /// `transport`. Every outcome is logged here; the returned value is for
    /// callers that want it.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the connection, if any.
    pub async fn handle<T>(&self, transport: T) -> RelayResult<BridgeStats>
    where
        T: Stream<Item = RelayResult<Bytes>> + Sink<Bytes, Error = RelayError> + Unpin,
    {
        let conn_id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let replication = match self.feed.replicate(false) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(conn_id, error = %e, "replication stream unavailable");
                let mut transport = transport;
                if let Err(close) = transport.close().await {
                    debug!(conn_id, error = %close, "transport close failed");
                }
                return Err(RelayError::Replicate(e.to_string()));
            }
        };

        let _guard = ActiveGuard::enter(&self.active);
        info!(conn_id, key = ?self.feed.key(), "replication connection open");

        let result = bridge(conn_id, replication, transport, self.max_chunk).await;
        match &result {
            Ok(stats) => info!(
                conn_id,
                sent = stats.sent,
                received = stats.received,
                closed_by = ?stats.closed_by,
                "replication connection closed"
            ),
            Err(e) => warn!(conn_id, error = %e, "replication error"),
        }
        result
    }
}

/// Keeps the active-connection gauge honest even if the task is dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use tokio::io::{duplex, DuplexStream};

    const CHUNK: usize = 1024;

    fn spawn_bridge(
        replication: DuplexStream,
        transport: ChannelTransport,
    ) -> tokio::task::JoinHandle<RelayResult<BridgeStats>> {
        tokio::spawn(bridge(1, replication, transport, CHUNK))
    }

    #[tokio::test]
    async fn bytes_flow_both_ways_in_order() {
        let (mut local, replication) = duplex(64);
        let (transport, mut remote) = ChannelTransport::pair(4);
        let task = spawn_bridge(replication, transport);

        local.write_all(b"hello ").await.unwrap();
        local.write_all(b"remote").await.unwrap();
        let mut got = Vec::new();
        while got.len() < 12 {
            got.extend_from_slice(&remote.next().await.unwrap().unwrap());
        }
        assert_eq!(got, b"hello remote");

        remote.send(Bytes::from_static(b"hi ")).await.unwrap();
        remote.send(Bytes::from_static(b"local")).await.unwrap();
        let mut buf = [0u8; 8];
        local.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi local");

        drop(remote);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.sent, 12);
        assert_eq!(stats.received, 8);
        assert_eq!(stats.closed_by, ClosedBy::Transport);
    }

    #[tokio::test]
    async fn remote_close_closes_replication() {
        let (mut local, replication) = duplex(64);
        let (transport, remote) = ChannelTransport::pair(4);
        let task = spawn_bridge(replication, transport);

        drop(remote);
        task.await.unwrap().unwrap();

        let mut buf = Vec::new();
        assert_eq!(local.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replication_end_closes_transport() {
        let (local, replication) = duplex(64);
        let (transport, mut remote) = ChannelTransport::pair(4);
        let task = spawn_bridge(replication, transport);

        drop(local);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.closed_by, ClosedBy::Replication);
        assert!(remote.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_tears_down_both_sides() {
        let (mut local, replication) = duplex(64);
        let (transport, mut remote) = ChannelTransport::pair(4);
        let task = spawn_bridge(replication, transport);

        remote.fail("connection reset").await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_transport());

        let mut buf = Vec::new();
        assert_eq!(local.read_to_end(&mut buf).await.unwrap(), 0);
        assert!(remote.next().await.is_none());
    }

    #[tokio::test]
    async fn slow_remote_applies_backpressure() {
        let (mut local, replication) = duplex(16);
        let (transport, mut remote) = ChannelTransport::pair(1);
        let task = spawn_bridge(replication, transport);

        // Far more than the duplex buffer and channel can hold at once.
        let payload = vec![7u8; 64 * 1024];
        let writer = tokio::spawn(async move {
            local.write_all(&payload).await.unwrap();
            local
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        let mut total = 0;
        while total < 64 * 1024 {
            total += remote.next().await.unwrap().unwrap().len();
        }
        let local = writer.await.unwrap();
        drop(local);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn messages_never_exceed_max_chunk() {
        let (mut local, replication) = duplex(64);
        let (transport, mut remote) = ChannelTransport::pair(16);
        let task = tokio::spawn(bridge(1, replication, transport, 3));

        local.write_all(b"0123456789").await.unwrap();
        drop(local);

        let mut got = Vec::new();
        while let Some(message) = remote.next().await {
            let message = message.unwrap();
            assert!(!message.is_empty() && message.len() <= 3, "{message:?}");
            got.extend_from_slice(&message);
        }
        assert_eq!(got, b"0123456789");
        assert_eq!(task.await.unwrap().unwrap().sent, 10);
    }

    struct RefusingFeed;

    impl Feed for RefusingFeed {
        type Stream = DuplexStream;

        fn key(&self) -> crate::FeedKey {
            crate::FeedKey::from_bytes([4; 32])
        }

        fn replicate(&self, _is_initiator: bool) -> std::io::Result<DuplexStream> {
            Err(std::io::Error::other("feed closed"))
        }
    }

    #[tokio::test]
    async fn refused_replication_closes_transport() {
        let relay = Relay::new(Arc::new(RefusingFeed), CHUNK);
        let (transport, mut remote) = ChannelTransport::pair(4);

        let err = relay.handle(transport).await.unwrap_err();
        assert!(matches!(err, RelayError::Replicate(ref reason) if reason == "feed closed"));
        assert!(remote.next().await.is_none());
        assert_eq!(relay.active_connections(), 0);
    }

    struct DuplexFeed;

    impl Feed for DuplexFeed {
        type Stream = DuplexStream;

        fn key(&self) -> crate::FeedKey {
            crate::FeedKey::from_bytes([3; 32])
        }

        fn replicate(&self, is_initiator: bool) -> std::io::Result<DuplexStream> {
            assert!(!is_initiator);
            let (ours, theirs) = duplex(64);
            // Echo whatever the peer sends back to it.
            tokio::spawn(async move {
                let (mut r, mut w) = tokio::io::split(theirs);
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
            Ok(ours)
        }
    }

    #[tokio::test]
    async fn connections_are_isolated() {
        let relay = Arc::new(Relay::new(Arc::new(DuplexFeed), CHUNK));

        let (first, mut first_remote) = ChannelTransport::pair(4);
        let (second, mut second_remote) = ChannelTransport::pair(4);
        let r1 = Arc::clone(&relay);
        let first_task = tokio::spawn(async move { r1.handle(first).await });
        let r2 = Arc::clone(&relay);
        let second_task = tokio::spawn(async move { r2.handle(second).await });

        first_remote.send(Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(&first_remote.next().await.unwrap().unwrap()[..], b"one");

        first_remote.fail("boom").await.unwrap();
        assert!(first_task.await.unwrap().is_err());

        second_remote.send(Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(&second_remote.next().await.unwrap().unwrap()[..], b"two");
        assert_eq!(relay.active_connections(), 1);

        drop(second_remote);
        second_task.await.unwrap().unwrap();
        assert_eq!(relay.active_connections(), 0);
    }
}
