//! Per-address virtual UDP connections.

use crate::error::TransportResult;
use crate::pool::PooledBuffer;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Protocol layer invoked for every datagram the multiplexer receives.
///
/// Registered once when the multiplexer is bound. Calls for one source
/// address are made sequentially from that address's worker; calls for
/// different addresses run concurrently.
#[async_trait]
pub trait DatagramHandler: Send + Sync + 'static {
    /// Handle one datagram received from `conn.peer_addr()`.
    async fn handle_datagram(&self, conn: &VirtualUdpConnection, payload: &[u8]);
}

/// Logical UDP session for one remote address, multiplexed over the shared
/// listening socket.
///
/// The remote address is the identity; there is no separate handle. Owned by
/// the [`UdpMultiplexer`](crate::UdpMultiplexer), borrowed by handlers to
/// write replies.
#[derive(Debug)]
pub struct VirtualUdpConnection {
    peer_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<PooledBuffer>,
    created_at: Instant,
    datagrams: AtomicU64,
}

impl VirtualUdpConnection {
    pub(crate) fn new(
        peer_addr: SocketAddr,
        socket: Arc<UdpSocket>,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<PooledBuffer>) {
        let (inbound, rx) = mpsc::channel(queue_capacity);
        let conn = Arc::new(Self {
            peer_addr,
            socket,
            inbound,
            created_at: Instant::now(),
            datagrams: AtomicU64::new(0),
        });
        (conn, rx)
    }

    /// Remote address this connection represents
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// When the first datagram from this address was seen
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Datagrams accepted into this connection's inbound queue
    #[must_use]
    pub fn datagrams_received(&self) -> u64 {
        self.datagrams.load(Ordering::Relaxed)
    }

    /// Send `data` straight to the remote address through the shared socket.
    ///
    /// Replies bypass the inbound queue entirely.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the send fails.
    pub async fn write(&self, data: &[u8]) -> TransportResult<usize> {
        Ok(self.socket.send_to(data, self.peer_addr).await?)
    }

    /// Non-blocking enqueue onto the inbound queue.
    pub(crate) fn try_deliver(&self, buf: PooledBuffer) -> Result<(), TrySendError<PooledBuffer>> {
        self.inbound.try_send(buf)?;
        self.datagrams.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
