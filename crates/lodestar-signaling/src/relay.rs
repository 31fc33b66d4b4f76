//! Signaling message routing.
//!
//! Offers and answers are forwarded to the addressed peer exactly as
//! received. A peer whose outbound queue is full when something is routed to
//! it is disconnected and deregistered; the sender is not told.

use crate::connection::{Enqueue, MessageSink, PeerConnection};
use crate::envelope::{SignalKind, SignalingEnvelope};
use crate::error::EnvelopeError;
use crate::registry::PeerRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a `close` envelope does to the sender's transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClosePolicy {
    /// Remove the sender from the directory; its socket stays open
    #[default]
    DeregisterOnly,
    /// Remove the sender and close its socket
    Disconnect,
}

/// Routes envelopes between registered peers
#[derive(Debug)]
pub struct SignalingRelay {
    registry: Arc<PeerRegistry>,
    close_policy: ClosePolicy,
}

impl SignalingRelay {
    /// Create a relay over `registry`
    #[must_use]
    pub fn new(registry: Arc<PeerRegistry>, close_policy: ClosePolicy) -> Self {
        Self {
            registry,
            close_policy,
        }
    }

    /// Registry this relay routes through
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    fn route(&self, sender: &str, payload: &[u8]) -> Result<(), EnvelopeError> {
        let envelope = SignalingEnvelope::parse(payload)?;
        let kind = envelope.validate_inbound()?;

        match kind {
            SignalKind::Offer | SignalKind::Answer => {
                let target = self
                    .registry
                    .get(&envelope.to)
                    .ok_or_else(|| EnvelopeError::TargetNotFound(envelope.to.clone()))?;

                // Parsing succeeded, so the payload is UTF-8 JSON.
                let frame = String::from_utf8_lossy(payload).into_owned();
                debug!("Forwarding {} from {} to {}", kind, sender, target.id());
                self.deliver(&target, frame);
            }
            SignalKind::Close => self.handle_close(sender),
            SignalKind::Register | SignalKind::Error => {
                return Err(EnvelopeError::UnsupportedType(kind.to_string()));
            }
        }
        Ok(())
    }

    fn handle_close(&self, sender: &str) {
        let Some(conn) = self.registry.remove(sender) else {
            return;
        };
        info!("Peer {} ({}) left", sender, conn.name());
        if self.close_policy == ClosePolicy::Disconnect {
            conn.close();
        }
    }

    /// Queue `frame` on `target`, disconnecting it if it cannot keep up.
    fn deliver(&self, target: &PeerConnection, frame: String) {
        match target.try_enqueue(frame) {
            Enqueue::Enqueued => {}
            outcome @ (Enqueue::Full | Enqueue::Closed) => {
                warn!(
                    "Disconnecting peer {} ({}): outbound queue {:?}",
                    target.id(),
                    target.name(),
                    outcome
                );
                target.close();
                self.registry.remove(target.id());
            }
        }
    }

    fn reply_error(&self, sender: &str, reason: String) {
        let Some(conn) = self.registry.get(sender) else {
            debug!("Dropping error for unregistered peer {}: {}", sender, reason);
            return;
        };
        match SignalingEnvelope::error(sender, reason).to_json() {
            Ok(frame) => self.deliver(&conn, frame),
            Err(e) => warn!("Failed to encode error envelope: {}", e),
        }
    }
}

impl MessageSink for SignalingRelay {
    fn handle_inbound(&self, peer: &str, payload: &[u8]) {
        if let Err(e) = self.route(peer, payload) {
            debug!("Rejected message from {}: {}", peer, e);
            self.reply_error(peer, e.to_string());
        }
    }

    fn handle_closed(&self, peer: &str) {
        if self.registry.remove(peer).is_some() {
            info!("Peer {} disconnected", peer);
        }
    }
}
