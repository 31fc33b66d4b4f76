//! Signaling service: handshake, registration and lifecycle.
//!
//! [`SignalingService`] is the boundary the rest of a process talks to:
//! accept a raw stream (or an already-upgraded WebSocket) and register it,
//! list the directory, and shut everything down. [`SignalingServer`] adds a
//! TCP accept loop in front of it.

use crate::connection::{MessageSink, PeerConnection, PeerId};
use crate::envelope::SignalingEnvelope;
use crate::error::{SignalingError, SignalingResult};
use crate::registry::{PeerDirectory, PeerRegistry, PeerSummary};
use crate::relay::{ClosePolicy, SignalingRelay};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Signaling service configuration
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Request path accepted for upgrades
    pub path: String,
    /// Per-peer outbound queue capacity
    pub outbound_queue_capacity: usize,
    /// What a `close` envelope does to the sender's socket
    pub close_policy: ClosePolicy,
    /// Limit on the HTTP upgrade exchange
    pub handshake_timeout: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            path: "/ws/signaling".to_string(),
            outbound_queue_capacity: 32,
            close_policy: ClosePolicy::default(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl SignalingConfig {
    /// Check the configuration before any socket or queue is created.
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::InvalidConfig` for a zero queue capacity or
    /// handshake timeout, or a path that does not start with `/`.
    pub fn validate(&self) -> SignalingResult<()> {
        if self.outbound_queue_capacity == 0 {
            return Err(SignalingError::InvalidConfig(
                "outbound_queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(SignalingError::InvalidConfig(
                "handshake_timeout must be non-zero".to_string(),
            ));
        }
        if !self.path.starts_with('/') {
            return Err(SignalingError::InvalidConfig(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        Ok(())
    }
}

/// Why a handshake was refused
enum Refusal {
    MissingName,
    UnknownPath(String),
}

fn refuse(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

fn query_name(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.into_owned())
        .filter(|name| !name.is_empty())
}

/// Peer registry, relay and task set for one signaling endpoint
pub struct SignalingService {
    config: SignalingConfig,
    registry: Arc<PeerRegistry>,
    relay: Arc<SignalingRelay>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl SignalingService {
    /// Create a service with an empty registry
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::InvalidConfig` if `config` fails
    /// [`SignalingConfig::validate`].
    pub fn new(config: SignalingConfig) -> SignalingResult<Self> {
        config.validate()?;
        let registry = Arc::new(PeerRegistry::new());
        let relay = Arc::new(SignalingRelay::new(
            Arc::clone(&registry),
            config.close_policy,
        ));
        Ok(Self {
            config,
            registry,
            relay,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Service configuration
    #[must_use]
    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    /// Underlying registry
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Perform the WebSocket upgrade on `stream` and register the peer.
    ///
    /// The request must target the configured path and carry a non-empty
    /// `name` query parameter; otherwise the upgrade is refused with 404 or
    /// 400 before it completes.
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::MissingName` or `SignalingError::UnknownPath`
    /// for a refused request, `SignalingError::HandshakeTimeout` if the
    /// exchange stalls, `SignalingError::Closed` if the service shuts down
    /// first, and `SignalingError::WebSocket` for protocol errors.
    pub async fn accept<S>(&self, stream: S) -> SignalingResult<PeerId>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(SignalingError::Closed);
        }

        let mut name = None;
        let mut refusal = None;
        let callback = |request: &Request, response: Response| {
            let path = request.uri().path();
            if path != self.config.path {
                refusal = Some(Refusal::UnknownPath(path.to_string()));
                return Err(refuse(StatusCode::NOT_FOUND, "not found"));
            }
            match query_name(request) {
                Some(n) => {
                    name = Some(n);
                    Ok(response)
                }
                None => {
                    refusal = Some(Refusal::MissingName);
                    Err(refuse(StatusCode::BAD_REQUEST, "missing username"))
                }
            }
        };

        let handshake = tokio::select! {
            () = self.shutdown.cancelled() => return Err(SignalingError::Closed),
            handshake = tokio::time::timeout(
                self.config.handshake_timeout,
                tokio_tungstenite::accept_hdr_async(stream, callback),
            ) => handshake.map_err(|_| SignalingError::HandshakeTimeout)?,
        };

        match (handshake, refusal, name) {
            (Ok(ws), _, Some(name)) => self.register(name, ws),
            (_, Some(Refusal::MissingName), _) => Err(SignalingError::MissingName),
            (_, Some(Refusal::UnknownPath(path)), _) => Err(SignalingError::UnknownPath(path)),
            (Err(e), None, _) => Err(e.into()),
            (Ok(_), None, None) => Err(SignalingError::MissingName),
        }
    }

    /// Register an upgraded WebSocket under a fresh peer id.
    ///
    /// The peer's first outbound frame is its `register` envelope.
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::Closed` after [`Self::shutdown`].
    pub fn register<S>(&self, name: String, ws: WebSocketStream<S>) -> SignalingResult<PeerId>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(SignalingError::Closed);
        }

        let id = Uuid::new_v4().to_string();
        let (conn, outbound) = PeerConnection::new(
            id.clone(),
            name,
            self.config.outbound_queue_capacity,
            self.shutdown.child_token(),
        );

        // Queued before the peer is reachable, so nothing can precede it.
        conn.try_enqueue(SignalingEnvelope::register(&id).to_json()?);
        self.registry.insert(Arc::clone(&conn));

        let sink: Arc<dyn MessageSink> = Arc::clone(&self.relay) as Arc<dyn MessageSink>;
        conn.start(ws, outbound, sink, &self.tracker);

        info!("Peer {} registered as {}", conn.name(), id);
        Ok(id)
    }

    /// Currently registered peers
    #[must_use]
    pub fn list_peers(&self) -> Vec<PeerSummary> {
        self.registry.list()
    }

    /// Currently registered peers in directory form
    #[must_use]
    pub fn directory(&self) -> PeerDirectory {
        self.registry.directory()
    }

    /// Number of registered peers
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether [`Self::shutdown`] has been called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Close every peer, stop accepting, and wait for all tasks to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.close_all();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Signaling service stopped");
    }
}

/// TCP listener feeding a [`SignalingService`]
pub struct SignalingServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    service: Arc<SignalingService>,
}

impl SignalingServer {
    /// Bind the listener
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::InvalidConfig` for an invalid `config` and
    /// `SignalingError::Bind` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: SignalingConfig) -> SignalingResult<Self> {
        let service = Arc::new(SignalingService::new(config)?);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SignalingError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            service,
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Service behind this listener
    #[must_use]
    pub fn service(&self) -> &Arc<SignalingService> {
        &self.service
    }

    /// Spawn the accept loop and hand back the service that owns it.
    ///
    /// [`SignalingService::shutdown`] stops the loop and releases the
    /// listener.
    pub fn start(self) -> Arc<SignalingService> {
        let service = Arc::clone(&self.service);
        info!(
            "Signaling listening on ws://{}{}",
            self.local_addr, service.config.path
        );
        service.tracker.spawn(self.accept_loop());
        service
    }

    async fn accept_loop(self) {
        let service = self.service;
        loop {
            let accepted = tokio::select! {
                () = service.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let _ = stream.set_nodelay(true);
                    let service = Arc::clone(&service);
                    service.tracker.clone().spawn(async move {
                        match service.accept(stream).await {
                            Ok(id) => debug!("Connection from {} registered as {}", peer_addr, id),
                            Err(e) => debug!("Handshake from {} failed: {}", peer_addr, e),
                        }
                    });
                }
                Err(e) => {
                    warn!("Signaling accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        debug!("Signaling accept loop on {} exited", self.local_addr);
    }
}
