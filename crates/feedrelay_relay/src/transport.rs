//! Message transports the relay can bridge to.
//!
//! A transport is anything that is both a [`Stream`] of inbound byte
//! messages and a [`Sink`] for outbound ones. The relay does not care what
//! carries them.

use crate::error::{RelayError, RelayResult};
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{ready, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A bounded in-memory duplex message transport.
///
/// Created in connected pairs: what one end sends, the other receives.
/// Dropping or closing one end ends the other's stream.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<RelayResult<Bytes>>,
    rx: mpsc::Receiver<RelayResult<Bytes>>,
}

impl ChannelTransport {
    /// Creates two connected ends, each buffering up to `capacity` messages.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }

    /// Delivers a transport error to the other end.
    ///
    /// # Errors
    ///
    /// Returns an error if the other end is gone.
    pub async fn fail(&mut self, message: impl Into<String>) -> RelayResult<()> {
        self.tx
            .send(Err(RelayError::Transport(message.into())))
            .await
            .map_err(closed)
    }
}

fn closed(_: mpsc::SendError) -> RelayError {
    RelayError::Transport("channel closed".to_string())
}

impl Stream for ChannelTransport {
    type Item = RelayResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Sink<Bytes> for ChannelTransport {
    type Error = RelayError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RelayResult<()>> {
        self.tx.poll_ready_unpin(cx).map_err(closed)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Bytes) -> RelayResult<()> {
        self.tx.start_send_unpin(Ok(item)).map_err(closed)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RelayResult<()>> {
        self.tx.poll_flush_unpin(cx).map_err(closed)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RelayResult<()>> {
        self.tx.poll_close_unpin(cx).map_err(closed)
    }
}

/// Adapts an upgraded WebSocket to a byte message transport.
///
/// Binary and text frames both carry replication bytes; ping and pong are
/// handled by the socket and skipped; a close frame ends the stream.
#[derive(Debug)]
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    /// Wraps an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Stream for WsTransport {
    type Item = RelayResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let message = match ready!(self.socket.poll_next_unpin(cx)) {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => return Poll::Ready(None),
            };
            match message {
                Message::Binary(bytes) => return Poll::Ready(Some(Ok(bytes))),
                Message::Text(text) => {
                    return Poll::Ready(Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))))
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return Poll::Ready(None),
            }
        }
    }
}

impl Sink<Bytes> for WsTransport {
    type Error = RelayError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RelayResult<()>> {
        self.socket.poll_ready_unpin(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Bytes) -> RelayResult<()> {
        self.socket
            .start_send_unpin(Message::Binary(item))
            .map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RelayResult<()>> {
        self.socket.poll_flush_unpin(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RelayResult<()>> {
        self.socket.poll_close_unpin(cx).map_err(Into::into)
    }
}
