//! Signaling envelope wire format.
//!
//! One JSON object per WebSocket text frame:
//!
//! ```json
//! {"type": "offer", "from": "<peer id>", "to": "<peer id>", "sdp": "v=0..."}
//! ```
//!
//! Frames sent by the service use the same shape plus `errorMsg`.

use crate::error::EnvelopeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sender id used on every frame the service originates
pub const SERVICE_ID: &str = "service";

/// Signaling message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Service to peer: assigned id (`to`)
    Register,
    /// SDP offer, forwarded to `to`
    Offer,
    /// SDP answer, forwarded to `to`
    Answer,
    /// Sender leaves the directory
    Close,
    /// Service to peer: request rejected, reason in `errorMsg`
    Error,
}

impl SignalKind {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Close => "close",
            Self::Error => "error",
        }
    }

    /// Whether the relay forwards this type to another peer
    #[must_use]
    pub fn is_forwarded(self) -> bool {
        matches!(self, Self::Offer | Self::Answer)
    }
}

impl FromStr for SignalKind {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(Self::Register),
            "offer" => Ok(Self::Offer),
            "answer" => Ok(Self::Answer),
            "close" => Ok(Self::Close),
            "error" => Ok(Self::Error),
            other => Err(EnvelopeError::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signaling message.
///
/// `type` is kept as the raw string so an unsupported value can be echoed
/// back in the error reply. Absent string fields decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    /// Message type, see [`SignalKind`]
    #[serde(rename = "type", default)]
    pub signal_type: String,
    /// Sending peer id
    #[serde(default)]
    pub from: String,
    /// Addressed peer id
    #[serde(default)]
    pub to: String,
    /// Opaque session description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sdp: String,
    /// Reason for an `error` frame
    #[serde(
        rename = "errorMsg",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub error_msg: String,
}

impl SignalingEnvelope {
    fn from_service(kind: SignalKind, to: &str) -> Self {
        Self {
            signal_type: kind.as_str().to_string(),
            from: SERVICE_ID.to_string(),
            to: to.to_string(),
            ..Self::default()
        }
    }

    /// Registration notice carrying the assigned peer id
    #[must_use]
    pub fn register(peer_id: &str) -> Self {
        Self::from_service(SignalKind::Register, peer_id)
    }

    /// Error reply to `peer_id`
    #[must_use]
    pub fn error(peer_id: &str, reason: impl Into<String>) -> Self {
        Self {
            error_msg: reason.into(),
            ..Self::from_service(SignalKind::Error, peer_id)
        }
    }

    /// SDP offer or answer from one peer to another
    #[must_use]
    pub fn sdp(kind: SignalKind, from: &str, to: &str, sdp: impl Into<String>) -> Self {
        Self {
            signal_type: kind.as_str().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            sdp: sdp.into(),
            error_msg: String::new(),
        }
    }

    /// Close request from `from`
    #[must_use]
    pub fn close(from: &str) -> Self {
        Self {
            signal_type: SignalKind::Close.as_str().to_string(),
            from: from.to_string(),
            ..Self::default()
        }
    }

    /// Parse a frame payload.
    ///
    /// # Errors
    ///
    /// Returns `EnvelopeError::Parse` if the payload is not a JSON object of
    /// this shape.
    pub fn parse(payload: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Serialize for sending
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization itself fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parsed message type
    ///
    /// # Errors
    ///
    /// Returns `EnvelopeError::UnsupportedType` for an unknown type.
    pub fn kind(&self) -> Result<SignalKind, EnvelopeError> {
        self.signal_type.parse()
    }

    /// Check an envelope received from a peer.
    ///
    /// Required fields are checked first, then the type. `from` is always
    /// required, `to` unless closing, and `sdp` for offer and answer. Every
    /// missing field is reported at once. Only offer, answer and close may be
    /// sent by peers.
    ///
    /// # Errors
    ///
    /// Returns `EnvelopeError::MissingFields` or
    /// `EnvelopeError::UnsupportedType`.
    pub fn validate_inbound(&self) -> Result<SignalKind, EnvelopeError> {
        let kind = self.kind();
        let closing = matches!(kind, Ok(SignalKind::Close));
        let forwarded = kind.as_ref().is_ok_and(|k| k.is_forwarded());

        let mut missing = Vec::new();
        if self.from.is_empty() {
            missing.push("from");
        }
        if self.to.is_empty() && !closing {
            missing.push("to");
        }
        if self.sdp.is_empty() && forwarded {
            missing.push("sdp");
        }
        if !missing.is_empty() {
            return Err(EnvelopeError::MissingFields(missing));
        }

        match kind? {
            k @ (SignalKind::Offer | SignalKind::Answer | SignalKind::Close) => Ok(k),
            other => Err(EnvelopeError::UnsupportedType(other.to_string())),
        }
    }
}
