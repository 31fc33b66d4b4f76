//! STUN client for server reflexive address discovery.

use crate::error::StunError;
use crate::message::{MessageType, StunMessage};
use crate::xor_address::Ipv6XorMode;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Default STUN timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// STUN client for server reflexive address discovery
#[derive(Debug)]
pub struct StunClient {
    socket: UdpSocket,
    timeout: Duration,
    ipv6_xor_mode: Ipv6XorMode,
}

impl StunClient {
    /// Bind a new STUN client to a local address
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound
    pub async fn bind(addr: &str) -> Result<Self, StunError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            timeout: DEFAULT_TIMEOUT,
            ipv6_xor_mode: Ipv6XorMode::default(),
        })
    }

    /// Set query timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Set the IPv6 transform expected from the server
    pub fn set_ipv6_xor_mode(&mut self, mode: Ipv6XorMode) {
        self.ipv6_xor_mode = mode;
    }

    /// Get local socket address
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined
    pub fn local_addr(&self) -> Result<SocketAddr, StunError> {
        Ok(self.socket.local_addr()?)
    }

    /// Send `request` to `server` and wait for the matching response.
    ///
    /// Datagrams from other sources are ignored; a response from `server`
    /// with a different transaction ID is an error.
    ///
    /// # Errors
    ///
    /// Returns `StunError::Timeout` if nothing arrives in time,
    /// `StunError::TransactionMismatch` for a foreign transaction ID, or a
    /// decode error for a malformed reply.
    pub async fn transact(
        &self,
        server: SocketAddr,
        request: &StunMessage,
    ) -> Result<StunMessage, StunError> {
        self.socket.send_to(&request.encode()?, server).await?;

        let mut buf = [0u8; 1500];
        let response = tokio::time::timeout(self.timeout, async {
            loop {
                let (len, from) = self.socket.recv_from(&mut buf).await?;
                if from != server {
                    debug!("Ignoring datagram from {} while waiting on {}", from, server);
                    continue;
                }
                return StunMessage::decode(&buf[..len]);
            }
        })
        .await
        .map_err(|_| StunError::Timeout)??;

        if response.transaction_id != request.transaction_id {
            return Err(StunError::TransactionMismatch);
        }
        Ok(response)
    }

    /// Get mapped address from STUN server
    ///
    /// # Errors
    ///
    /// Returns `StunError` if:
    /// - Network I/O fails
    /// - STUN server doesn't respond within timeout
    /// - Response is invalid or missing XOR-MAPPED-ADDRESS
    pub async fn get_mapped_address(&self, server: SocketAddr) -> Result<SocketAddr, StunError> {
        let request = StunMessage::binding_request();
        let response = self.transact(server, &request).await?;

        if response.message_type != MessageType::BindingResponse {
            return Err(StunError::UnexpectedResponse(response.message_type.as_u16()));
        }

        response.xor_mapped_address(self.ipv6_xor_mode)
    }
}
