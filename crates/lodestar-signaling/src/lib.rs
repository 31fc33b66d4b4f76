//! # Lodestar Signaling
//!
//! WebSocket rendezvous for WebRTC peers that cannot reach each other yet.
//!
//! Peers connect with a display name, are assigned an opaque id, and exchange
//! SDP offers and answers through the relay, which forwards them verbatim to
//! the addressed peer.
//!
//! This crate provides:
//! - [`PeerConnection`]: receive and send loops decoupled by a bounded queue
//! - [`PeerRegistry`]: concurrent id to connection directory
//! - [`SignalingRelay`]: envelope validation and routing
//! - [`SignalingService`] and [`SignalingServer`]: handshake, registration,
//!   listing and shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod relay;
pub mod server;

pub use connection::{Enqueue, MessageSink, PeerConnection, PeerId};
pub use envelope::{SERVICE_ID, SignalKind, SignalingEnvelope};
pub use error::{EnvelopeError, SignalingError, SignalingResult};
pub use registry::{PeerDirectory, PeerRegistry, PeerSummary};
pub use relay::{ClosePolicy, SignalingRelay};
pub use server::{SignalingConfig, SignalingServer, SignalingService};
