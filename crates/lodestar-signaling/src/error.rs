//! Signaling error types.

use std::io;
use std::net::SocketAddr;
use tokio_tungstenite::tungstenite;

/// Errors surfaced to the owner of a [`SignalingService`](crate::SignalingService)
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    /// I/O error from the listener or a peer socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Listener could not be bound
    #[error("Failed to bind signaling listener on {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        source: io::Error,
    },

    /// WebSocket handshake or protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    /// Envelope serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake did not complete in time
    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    /// Handshake refused: no `name` query parameter
    #[error("missing username")]
    MissingName,

    /// Handshake refused: request path is not the signaling endpoint
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// Configuration rejected by [`SignalingConfig::validate`](crate::SignalingConfig::validate)
    #[error("Invalid signaling configuration: {0}")]
    InvalidConfig(String),

    /// Service has been shut down
    #[error("signaling service is shut down")]
    Closed,
}

impl From<tungstenite::Error> for SignalingError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Result type for signaling operations
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Why an inbound envelope was rejected.
///
/// The `Display` text is what the sender receives in `errorMsg`.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Payload is not a JSON envelope
    #[error("invalid signaling format: {0}")]
    Parse(#[from] serde_json::Error),

    /// `type` is missing or not one a client may send
    #[error("unsupported signaling type: {0}")]
    UnsupportedType(String),

    /// Required fields are empty or absent
    #[error("missing required field(s): {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// Addressed peer is not registered
    #[error("target peer {0} not found")]
    TargetNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_error_display() {
        assert_eq!(
            EnvelopeError::UnsupportedType("ice".into()).to_string(),
            "unsupported signaling type: ice"
        );
        assert_eq!(
            EnvelopeError::MissingFields(vec!["from", "to", "sdp"]).to_string(),
            "missing required field(s): from, to, sdp"
        );
        assert_eq!(
            EnvelopeError::TargetNotFound("abc".into()).to_string(),
            "target peer abc not found"
        );
    }

    #[test]
    fn test_parse_error_prefix() {
        let err: EnvelopeError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("invalid signaling format: "));
    }
}
