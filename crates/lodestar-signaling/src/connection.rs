//! One signaling peer's WebSocket connection.
//!
//! Two tasks per connection: a receive loop that hands every inbound frame
//! to a [`MessageSink`], and a send loop that drains a bounded outbound
//! queue onto the socket. Producers never wait on a slow peer:
//! [`PeerConnection::try_enqueue`] reports a full queue and the caller
//! decides to disconnect.
//!
//! Teardown runs exactly once, from the receive loop, whichever way the
//! connection ends (close frame, read error, write error, or [`close`]).
//!
//! [`close`]: PeerConnection::close

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Upper bound on flushing the close handshake to a peer that stopped reading
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Server-assigned peer identifier (UUIDv4 string)
pub type PeerId = String;

/// Receiver of a connection's inbound traffic and lifecycle.
///
/// Called from the connection's receive loop; implementations must not
/// block.
pub trait MessageSink: Send + Sync + 'static {
    /// A text or binary frame arrived from `peer`
    fn handle_inbound(&self, peer: &str, payload: &[u8]);

    /// `peer`'s connection has ended. Called once per connection.
    fn handle_closed(&self, peer: &str);
}

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Frame queued for sending
    Enqueued,
    /// Queue at capacity; frame discarded
    Full,
    /// Connection is shutting down; frame discarded
    Closed,
}

/// A registered signaling peer
#[derive(Debug)]
pub struct PeerConnection {
    id: PeerId,
    name: String,
    outbound: mpsc::Sender<String>,
    shutdown: CancellationToken,
    connected_at: Instant,
}

impl PeerConnection {
    /// Create the connection and its outbound queue without starting any
    /// task. `shutdown` is cancelled on teardown.
    pub(crate) fn new(
        id: PeerId,
        name: String,
        queue_capacity: usize,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(queue_capacity);
        let conn = Arc::new(Self {
            id,
            name,
            outbound,
            shutdown,
            connected_at: Instant::now(),
        });
        (conn, rx)
    }

    /// Spawn the receive and send loops on `tracker`.
    pub(crate) fn start<S>(
        self: &Arc<Self>,
        ws: WebSocketStream<S>,
        outbound: mpsc::Receiver<String>,
        sink: Arc<dyn MessageSink>,
        tracker: &TaskTracker,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, reader) = ws.split();
        tracker.spawn(Arc::clone(self).send_loop(writer, outbound));
        tracker.spawn(Arc::clone(self).receive_loop(reader, sink));
    }

    /// Peer id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name supplied at connect time
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the peer registered
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Whether teardown has started
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Queue `frame` for sending without waiting.
    pub fn try_enqueue(&self, frame: String) -> Enqueue {
        if self.is_closed() {
            return Enqueue::Closed;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => Enqueue::Enqueued,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// `true` if `frame` was queued
    pub fn send(&self, frame: String) -> bool {
        self.try_enqueue(frame) == Enqueue::Enqueued
    }

    /// Force the connection down. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    async fn receive_loop<S>(
        self: Arc<Self>,
        mut reader: SplitStream<WebSocketStream<S>>,
        sink: Arc<dyn MessageSink>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let frame = tokio::select! {
                () = self.shutdown.cancelled() => break,
                frame = reader.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => sink.handle_inbound(&self.id, text.as_bytes()),
                Some(Ok(Message::Binary(data))) => sink.handle_inbound(&self.id, &data),
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Peer {} closed the connection", self.id);
                    break;
                }
                // Ping/pong are answered by the protocol layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Read error from peer {}: {}", self.id, e);
                    break;
                }
            }
        }

        self.shutdown.cancel();
        debug!(
            "Peer {} ({}) disconnected after {:?}",
            self.name,
            self.id,
            self.connected_at.elapsed()
        );
        sink.handle_closed(&self.id);
    }

    async fn send_loop<S>(
        self: Arc<Self>,
        mut writer: SplitSink<WebSocketStream<S>, Message>,
        mut outbound: mpsc::Receiver<String>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let frame = tokio::select! {
                () = self.shutdown.cancelled() => break,
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let write = tokio::select! {
                () = self.shutdown.cancelled() => break,
                write = writer.send(Message::Text(frame.into())) => write,
            };
            if let Err(e) = write {
                warn!("Write to peer {} failed: {}", self.id, e);
                self.shutdown.cancel();
                break;
            }
        }

        outbound.close();
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer.close()).await;
    }
}
