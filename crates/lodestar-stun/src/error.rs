//! STUN error types.

use std::io;

/// STUN error types
#[derive(Debug, thiserror::Error)]
pub enum StunError {
    /// Datagram shorter than the 20-byte header
    #[error("packet too short: {len} bytes")]
    PacketTooShort {
        /// Bytes received
        len: usize,
    },

    /// Bytes 4..8 were not `21 12 A4 42`
    #[error("magic cookie mismatch: {0:#010x}")]
    MagicCookieMismatch(u32),

    /// Header length field disagrees with the bytes actually present
    #[error("message length mismatch: header says {declared}, found {actual}")]
    LengthMismatch {
        /// Attribute length from the header
        declared: usize,
        /// Bytes following the header
        actual: usize,
    },

    /// Fewer than 4 bytes left for an attribute header
    #[error("attribute too short at offset {offset}")]
    AttributeTooShort {
        /// Offset of the truncated header
        offset: usize,
    },

    /// Attribute value runs past the end of the message
    #[error("attribute length mismatch: type {attr_type:#06x} declares {declared} bytes, {remaining} remain")]
    AttributeLengthMismatch {
        /// Attribute type
        attr_type: u16,
        /// Declared value length
        declared: usize,
        /// Bytes left in the message
        remaining: usize,
    },

    /// Attribute value cannot be described by a 16-bit length
    #[error("attribute value too large: {0} bytes")]
    AttributeTooLarge(usize),

    /// Attribute section cannot be described by a 16-bit length
    #[error("message too large: {0} attribute bytes")]
    MessageTooLarge(usize),

    /// Attribute value is not a valid encoding for its type
    #[error("invalid attribute: {0}")]
    InvalidAttribute(&'static str),

    /// Required attribute absent
    #[error("missing attribute {0:#06x}")]
    MissingAttribute(u16),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Query timeout
    #[error("STUN query timeout")]
    Timeout,

    /// Response carried a different transaction ID
    #[error("transaction ID mismatch")]
    TransactionMismatch,

    /// Response was not a Binding success response
    #[error("unexpected response type {0:#06x}")]
    UnexpectedResponse(u16),
}

impl StunError {
    /// Whether this error describes undecodable wire data
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::PacketTooShort { .. }
                | Self::MagicCookieMismatch(_)
                | Self::LengthMismatch { .. }
                | Self::AttributeTooShort { .. }
                | Self::AttributeLengthMismatch { .. }
                | Self::InvalidAttribute(_)
        )
    }
}
