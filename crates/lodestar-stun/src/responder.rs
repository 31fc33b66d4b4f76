//! Binding request responder.
//!
//! Plugged into a [`UdpMultiplexer`](lodestar_transport::UdpMultiplexer) as its
//! [`DatagramHandler`]. Binding requests are answered with a success response
//! carrying the observed source address; anything else is logged and
//! dropped, since an unauthenticated UDP sender has no reliable error path.

use crate::message::{MessageType, StunMessage};
use crate::rate_limit::StunRateLimiter;
use crate::xor_address::Ipv6XorMode;
use async_trait::async_trait;
use lodestar_transport::{DatagramHandler, VirtualUdpConnection};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Requests between sweeps of stale rate-limiter history
const LIMITER_SWEEP_INTERVAL: u64 = 4096;

/// Responder configuration
#[derive(Debug, Clone, Default)]
pub struct ResponderConfig {
    /// IPv6 XOR-MAPPED-ADDRESS transform
    pub ipv6_xor_mode: Ipv6XorMode,
    /// Per-IP requests per second; `None` disables limiting
    pub rate_limit: Option<usize>,
}

/// Responder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponderStats {
    /// Binding requests answered
    pub requests_answered: u64,
    /// Datagrams that failed to decode
    pub malformed: u64,
    /// Well-formed messages that were not Binding requests
    pub unsupported: u64,
    /// Requests dropped by the rate limiter
    pub rate_limited: u64,
    /// Responses that could not be sent
    pub send_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests_answered: AtomicU64,
    malformed: AtomicU64,
    unsupported: AtomicU64,
    rate_limited: AtomicU64,
    send_failures: AtomicU64,
}

/// Stateless STUN Binding responder
#[derive(Debug)]
pub struct StunResponder {
    config: ResponderConfig,
    limiter: Option<StunRateLimiter>,
    counters: Counters,
}

impl StunResponder {
    /// Create a responder
    #[must_use]
    pub fn new(config: ResponderConfig) -> Self {
        let limiter = config.rate_limit.map(StunRateLimiter::new);
        Self {
            config,
            limiter,
            counters: Counters::default(),
        }
    }

    /// Snapshot of the responder counters
    #[must_use]
    pub fn stats(&self) -> ResponderStats {
        let c = &self.counters;
        ResponderStats {
            requests_answered: c.requests_answered.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            unsupported: c.unsupported.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
        }
    }

    /// Build the reply to `datagram` received from `source`, if any.
    #[must_use]
    pub fn respond(&self, datagram: &[u8], source: SocketAddr) -> Option<Vec<u8>> {
        let request = match StunMessage::decode(datagram) {
            Ok(msg) => msg,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping malformed STUN datagram from {}: {}", source, e);
                return None;
            }
        };

        if request.message_type != MessageType::BindingRequest {
            self.counters.unsupported.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Dropping unsupported STUN message {:#06x} from {}",
                request.message_type.as_u16(),
                source
            );
            return None;
        }

        if let Some(limiter) = &self.limiter {
            if !limiter.allow_request(source.ip()) {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                debug!("Rate limited STUN request from {}", source);
                return None;
            }
        }

        let mut response = StunMessage::binding_response(request.transaction_id);
        response.set_xor_mapped_address(source, self.config.ipv6_xor_mode);

        match response.encode() {
            Ok(bytes) => {
                let answered = self
                    .counters
                    .requests_answered
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if answered % LIMITER_SWEEP_INTERVAL == 0 {
                    if let Some(limiter) = &self.limiter {
                        limiter.cleanup();
                    }
                }
                Some(bytes)
            }
            Err(e) => {
                warn!("Failed to encode STUN response for {}: {}", source, e);
                None
            }
        }
    }
}

impl Default for StunResponder {
    fn default() -> Self {
        Self::new(ResponderConfig::default())
    }
}

#[async_trait]
impl DatagramHandler for StunResponder {
    async fn handle_datagram(&self, conn: &VirtualUdpConnection, payload: &[u8]) {
        let Some(reply) = self.respond(payload, conn.peer_addr()) else {
            return;
        };

        if let Err(e) = conn.write(&reply).await {
            self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to send STUN response to {}: {}", conn.peer_addr(), e);
        }
    }
}
