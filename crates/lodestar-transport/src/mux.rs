//! Single-socket UDP multiplexer.
//!
//! One listen task reads every datagram arriving on the socket and routes it
//! to the [`VirtualUdpConnection`] for its source address, creating one (and
//! spawning its worker) on first sight. Each worker drains its own bounded
//! queue into the registered [`DatagramHandler`] and evicts itself after the
//! configured idle window passes without a datagram.
//!
//! Locking discipline: the address table is a `DashMap`; no shard guard is
//! held across an `.await` or across a call into the handler.

use crate::connection::{DatagramHandler, VirtualUdpConnection};
use crate::error::{TransportError, TransportResult};
use crate::pool::{BufferPool, PooledBuffer};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Multiplexer configuration
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Inactivity window after which a virtual connection is evicted
    pub idle_timeout: Duration,
    /// Capacity of each virtual connection's inbound queue
    pub queue_capacity: usize,
    /// Size of each pooled receive buffer (largest accepted datagram)
    pub recv_buffer_size: usize,
    /// Maximum idle buffers retained by the pool
    pub pool_capacity: usize,
    /// Kernel send/receive buffer size for the socket
    pub socket_buffer_size: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            queue_capacity: 100,
            recv_buffer_size: 1500,
            pool_capacity: 256,
            socket_buffer_size: 2 * 1024 * 1024,
        }
    }
}

impl MuxConfig {
    fn validate(&self) -> TransportResult<()> {
        if self.idle_timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "idle_timeout must be non-zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.recv_buffer_size == 0 || self.pool_capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "recv_buffer_size and pool_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Multiplexer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// Datagrams read from the socket
    pub datagrams_received: u64,
    /// Datagrams discarded because a connection's inbound queue was full
    pub datagrams_dropped: u64,
    /// Virtual connections created
    pub connections_created: u64,
    /// Virtual connections evicted after going idle
    pub connections_evicted: u64,
    /// Socket receive errors
    pub recv_errors: u64,
}

#[derive(Default)]
struct MuxCounters {
    datagrams_received: AtomicU64,
    datagrams_dropped: AtomicU64,
    connections_created: AtomicU64,
    connections_evicted: AtomicU64,
    recv_errors: AtomicU64,
}

struct MuxInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: MuxConfig,
    handler: Arc<dyn DatagramHandler>,
    connections: DashMap<SocketAddr, Arc<VirtualUdpConnection>>,
    pool: BufferPool,
    counters: MuxCounters,
    started: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Turns one UDP socket into many per-address virtual connections.
///
/// # Examples
///
/// ```no_run
/// use lodestar_transport::{DatagramHandler, MuxConfig, UdpMultiplexer, VirtualUdpConnection};
/// use std::sync::Arc;
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl DatagramHandler for Echo {
///     async fn handle_datagram(&self, conn: &VirtualUdpConnection, payload: &[u8]) {
///         let _ = conn.write(payload).await;
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mux = UdpMultiplexer::bind("127.0.0.1:0".parse()?, MuxConfig::default(), Arc::new(Echo)).await?;
/// mux.start()?;
/// // ...
/// mux.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct UdpMultiplexer {
    inner: Arc<MuxInner>,
}

impl UdpMultiplexer {
    /// Bind the listening socket.
    ///
    /// The listen loop does not run until [`Self::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidConfig` for a zero idle timeout or
    /// capacity, and `TransportError::BindFailed` if the socket cannot be
    /// created or bound.
    pub async fn bind(
        addr: SocketAddr,
        config: MuxConfig,
        handler: Arc<dyn DatagramHandler>,
    ) -> TransportResult<Self> {
        config.validate()?;

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let socket2 =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .set_recv_buffer_size(config.socket_buffer_size)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket2
            .set_send_buffer_size(config.socket_buffer_size)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .bind(&addr.into())
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;

        socket2
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let local_addr = socket.local_addr()?;

        let pool = BufferPool::new(config.recv_buffer_size, config.pool_capacity);

        Ok(Self {
            inner: Arc::new(MuxInner {
                socket: Arc::new(socket),
                local_addr,
                config,
                handler,
                connections: DashMap::new(),
                pool,
                counters: MuxCounters::default(),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// Address the socket is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Spawn the listen loop.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AlreadyStarted` on a second call and
    /// `TransportError::Closed` after [`Self::shutdown`].
    pub fn start(&self) -> TransportResult<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyStarted);
        }

        info!("UDP multiplexer listening on {}", self.inner.local_addr);
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(listen_loop(inner));
        Ok(())
    }

    /// Number of live virtual connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Whether a virtual connection currently exists for `addr`
    #[must_use]
    pub fn has_connection(&self, addr: &SocketAddr) -> bool {
        self.inner.connections.contains_key(addr)
    }

    /// Snapshot of the multiplexer counters
    #[must_use]
    pub fn stats(&self) -> MuxStats {
        let c = &self.inner.counters;
        MuxStats {
            datagrams_received: c.datagrams_received.load(Ordering::Relaxed),
            datagrams_dropped: c.datagrams_dropped.load(Ordering::Relaxed),
            connections_created: c.connections_created.load(Ordering::Relaxed),
            connections_evicted: c.connections_evicted.load(Ordering::Relaxed),
            recv_errors: c.recv_errors.load(Ordering::Relaxed),
        }
    }

    /// Stop the listen loop and every per-address worker, and wait for all
    /// of them to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.connections.clear();
        info!("UDP multiplexer on {} stopped", self.inner.local_addr);
    }
}

impl Drop for UdpMultiplexer {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn listen_loop(inner: Arc<MuxInner>) {
    loop {
        let mut buf = inner.pool.checkout();

        let received = tokio::select! {
            () = inner.cancel.cancelled() => break,
            res = inner.socket.recv_from(&mut buf) => res,
        };

        match received {
            Ok((len, from)) => {
                buf.truncate(len);
                inner
                    .counters
                    .datagrams_received
                    .fetch_add(1, Ordering::Relaxed);
                dispatch(&inner, from, buf);
            }
            Err(e) => {
                inner.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                warn!("UDP receive error on {}: {}", inner.local_addr, e);
            }
        }
    }
    debug!("UDP listen loop on {} exited", inner.local_addr);
}

/// Route one datagram to its virtual connection.
///
/// A connection whose worker is mid-eviction rejects the datagram as closed;
/// the stale entry is then replaced and delivery retried once against the
/// fresh connection.
fn dispatch(inner: &Arc<MuxInner>, from: SocketAddr, mut buf: PooledBuffer) {
    for _ in 0..2 {
        let conn = connection_for(inner, from);
        match conn.try_deliver(buf) {
            Ok(()) => return,
            Err(TrySendError::Full(_dropped)) => {
                inner
                    .counters
                    .datagrams_dropped
                    .fetch_add(1, Ordering::Relaxed);
                warn!("UDP recv queue full for {}, dropping datagram", from);
                return;
            }
            Err(TrySendError::Closed(returned)) => {
                inner
                    .connections
                    .remove_if(&from, |_, existing| Arc::ptr_eq(existing, &conn));
                buf = returned;
            }
        }
    }
    debug!("Dropping datagram from {} during shutdown", from);
}

fn connection_for(inner: &Arc<MuxInner>, from: SocketAddr) -> Arc<VirtualUdpConnection> {
    let (conn, rx) = match inner.connections.entry(from) {
        Entry::Occupied(entry) => (Arc::clone(entry.get()), None),
        Entry::Vacant(entry) => {
            let (conn, rx) = VirtualUdpConnection::new(
                from,
                Arc::clone(&inner.socket),
                inner.config.queue_capacity,
            );
            entry.insert(Arc::clone(&conn));
            (conn, Some(rx))
        }
    };

    // Spawn outside the shard guard.
    if let Some(rx) = rx {
        inner
            .counters
            .connections_created
            .fetch_add(1, Ordering::Relaxed);
        debug!("New virtual UDP connection from {}", from);
        inner
            .tracker
            .spawn(connection_worker(Arc::clone(inner), Arc::clone(&conn), rx));
    }
    conn
}

async fn connection_worker(
    inner: Arc<MuxInner>,
    conn: Arc<VirtualUdpConnection>,
    mut rx: mpsc::Receiver<PooledBuffer>,
) {
    let idle = inner.config.idle_timeout;

    loop {
        // A fresh timeout per wait: every datagram restarts the idle window.
        let next = tokio::select! {
            () = inner.cancel.cancelled() => break,
            next = tokio::time::timeout(idle, rx.recv()) => next,
        };

        match next {
            Ok(Some(buf)) => {
                tokio::select! {
                    () = inner.cancel.cancelled() => break,
                    () = inner.handler.handle_datagram(&conn, &buf) => {}
                }
            }
            Ok(None) => break,
            Err(_) => {
                inner
                    .counters
                    .connections_evicted
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Evicting idle UDP connection {} after {:?} ({} datagrams)",
                    conn.peer_addr(),
                    conn.created_at().elapsed(),
                    conn.datagrams_received()
                );
                break;
            }
        }
    }

    retire(&inner, &conn, rx);
}

/// Unlink a finished connection and hand anything that raced into its queue
/// to a fresh connection for the same address.
fn retire(
    inner: &Arc<MuxInner>,
    conn: &Arc<VirtualUdpConnection>,
    mut rx: mpsc::Receiver<PooledBuffer>,
) {
    let addr = conn.peer_addr();
    inner
        .connections
        .remove_if(&addr, |_, existing| Arc::ptr_eq(existing, conn));

    rx.close();
    while let Ok(buf) = rx.try_recv() {
        if inner.cancel.is_cancelled() {
            // Back to the pool unprocessed.
            continue;
        }
        dispatch(inner, addr, buf);
    }
}
