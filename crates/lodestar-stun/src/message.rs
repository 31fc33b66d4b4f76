//! STUN message codec.
//!
//! Wire layout (RFC 5389 Section 6):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0 0|     STUN Message Type     |         Message Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Magic Cookie                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Transaction ID (96 bits)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! followed by TLV attributes. The TLV length is the unpadded value length;
//! values are zero-padded to a 4-byte boundary on the wire. Stored attribute
//! values never include padding.

use crate::error::StunError;
use crate::xor_address::{self, Ipv6XorMode};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// STUN magic cookie (0x2112A442)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Attribute header size (type + length)
const ATTR_HEADER_SIZE: usize = 4;

/// XOR-MAPPED-ADDRESS attribute type
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// SOFTWARE attribute type
pub const ATTR_SOFTWARE: u16 = 0x8022;

/// Binding method
const METHOD_BINDING: u16 = 0x0001;

/// Padding needed after a value of `len` bytes
#[inline]
fn padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Request message
    Request,
    /// Indication (no response expected)
    Indication,
    /// Success response
    SuccessResponse,
    /// Error response
    ErrorResponse,
}

/// STUN message type.
///
/// Binding request and success response get their own variants; every other
/// 16-bit value is carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Binding Request (0x0001)
    BindingRequest,
    /// Binding success response (0x0101)
    BindingResponse,
    /// Any other message type
    Other(u16),
}

impl MessageType {
    /// Combine a 12-bit method and a class into the wire type value.
    ///
    /// ```text
    ///  0                 1
    ///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
    /// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    #[must_use]
    pub fn compose(method: u16, class: MessageClass) -> Self {
        let class_bits = match class {
            MessageClass::Request => 0b00,
            MessageClass::Indication => 0b01,
            MessageClass::SuccessResponse => 0b10,
            MessageClass::ErrorResponse => 0b11,
        };

        let m0_m3 = method & 0x0F;
        let c0 = (class_bits & 0x01) << 4;
        let m4_m6 = (method & 0x70) << 1;
        let c1 = (class_bits & 0x02) << 7;
        let m7_m11 = (method & 0xF80) << 2;

        Self::from(m0_m3 | c0 | m4_m6 | c1 | m7_m11)
    }

    /// Raw 16-bit wire value
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingResponse => 0x0101,
            Self::Other(v) => v,
        }
    }

    /// Class bits (C0 at bit 4, C1 at bit 8)
    #[must_use]
    pub fn class(self) -> MessageClass {
        let raw = self.as_u16();
        let c0 = (raw >> 4) & 0x01;
        let c1 = (raw >> 8) & 0x01;
        match c0 | (c1 << 1) {
            0b00 => MessageClass::Request,
            0b01 => MessageClass::Indication,
            0b10 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        }
    }

    /// 12-bit method with the class bits removed
    #[must_use]
    pub fn method(self) -> u16 {
        let raw = self.as_u16();
        let m0_m3 = raw & 0x0F;
        let m4_m6 = (raw >> 1) & 0x70;
        let m7_m11 = (raw >> 2) & 0xF80;
        m0_m3 | m4_m6 | m7_m11
    }
}

impl From<u16> for MessageType {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => Self::BindingRequest,
            0x0101 => Self::BindingResponse,
            v => Self::Other(v),
        }
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value.as_u16()
    }
}

/// A decoded STUN message.
///
/// Attributes are keyed by type; setting a type twice keeps the last value,
/// which is also how duplicate attributes on the wire are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message type
    pub message_type: MessageType,
    /// Transaction ID (96 bits), echoed verbatim in responses
    pub transaction_id: [u8; 12],
    attributes: BTreeMap<u16, Vec<u8>>,
}

impl StunMessage {
    /// Create a message with no attributes
    #[must_use]
    pub fn new(message_type: MessageType, transaction_id: [u8; 12]) -> Self {
        Self {
            message_type,
            transaction_id,
            attributes: BTreeMap::new(),
        }
    }

    /// Create a Binding Request with a random transaction ID
    #[must_use]
    pub fn binding_request() -> Self {
        use rand::RngCore;
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        Self::new(MessageType::BindingRequest, transaction_id)
    }

    /// Create a Binding success response for `transaction_id`
    #[must_use]
    pub fn binding_response(transaction_id: [u8; 12]) -> Self {
        Self::new(MessageType::BindingResponse, transaction_id)
    }

    /// Whether this is a Binding Request
    #[must_use]
    pub fn is_binding_request(&self) -> bool {
        self.message_type == MessageType::BindingRequest
    }

    /// Unpadded value of attribute `attr_type`
    #[must_use]
    pub fn attribute(&self, attr_type: u16) -> Option<&[u8]> {
        self.attributes.get(&attr_type).map(Vec::as_slice)
    }

    /// Set (or replace) an attribute value.
    ///
    /// # Errors
    ///
    /// Returns `StunError::AttributeTooLarge` if the value exceeds 65535 bytes.
    pub fn set_attribute(&mut self, attr_type: u16, value: Vec<u8>) -> Result<(), StunError> {
        if value.len() > usize::from(u16::MAX) {
            return Err(StunError::AttributeTooLarge(value.len()));
        }
        self.attributes.insert(attr_type, value);
        Ok(())
    }

    /// Iterate attributes in ascending type order
    pub fn attributes(&self) -> impl Iterator<Item = (u16, &[u8])> {
        self.attributes.iter().map(|(t, v)| (*t, v.as_slice()))
    }

    /// Number of distinct attributes
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Set XOR-MAPPED-ADDRESS to `addr`
    pub fn set_xor_mapped_address(&mut self, addr: SocketAddr, mode: Ipv6XorMode) {
        let value = xor_address::encode(addr, &self.transaction_id, mode);
        self.attributes.insert(ATTR_XOR_MAPPED_ADDRESS, value);
    }

    /// Decode the XOR-MAPPED-ADDRESS attribute.
    ///
    /// # Errors
    ///
    /// Returns `StunError::MissingAttribute` if absent, or
    /// `StunError::InvalidAttribute` if the value is malformed.
    pub fn xor_mapped_address(&self, mode: Ipv6XorMode) -> Result<SocketAddr, StunError> {
        let value = self
            .attribute(ATTR_XOR_MAPPED_ADDRESS)
            .ok_or(StunError::MissingAttribute(ATTR_XOR_MAPPED_ADDRESS))?;
        xor_address::decode(value, &self.transaction_id, mode)
    }

    /// Bytes the attribute section occupies on the wire
    fn attributes_wire_len(&self) -> usize {
        self.attributes
            .values()
            .map(|v| ATTR_HEADER_SIZE + v.len() + padding(v.len()))
            .sum()
    }

    /// Encode message to bytes.
    ///
    /// # Errors
    ///
    /// Returns `StunError::MessageTooLarge` if the padded attribute section
    /// does not fit the 16-bit length field.
    pub fn encode(&self) -> Result<Vec<u8>, StunError> {
        let attr_len = self.attributes_wire_len();
        let wire_len = u16::try_from(attr_len).map_err(|_| StunError::MessageTooLarge(attr_len))?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + attr_len);
        bytes.extend_from_slice(&self.message_type.as_u16().to_be_bytes());
        bytes.extend_from_slice(&wire_len.to_be_bytes());
        bytes.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        bytes.extend_from_slice(&self.transaction_id);

        for (attr_type, value) in &self.attributes {
            bytes.extend_from_slice(&attr_type.to_be_bytes());
            // Bounded by set_attribute
            bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
            bytes.extend_from_slice(value);
            bytes.extend(std::iter::repeat_n(0, padding(value.len())));
        }

        Ok(bytes)
    }

    /// Decode message from bytes.
    ///
    /// The header length must match the bytes present exactly. A final
    /// attribute missing its trailing padding is accepted.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message `StunError` (see [`StunError::is_malformed`]).
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StunError::PacketTooShort { len: bytes.len() });
        }

        let msg_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let msg_length = usize::from(u16::from_be_bytes([bytes[2], bytes[3]]));
        let magic_cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        if magic_cookie != MAGIC_COOKIE {
            return Err(StunError::MagicCookieMismatch(magic_cookie));
        }

        if msg_length != bytes.len() - HEADER_SIZE {
            return Err(StunError::LengthMismatch {
                declared: msg_length,
                actual: bytes.len() - HEADER_SIZE,
            });
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&bytes[8..HEADER_SIZE]);

        let mut attributes = BTreeMap::new();
        let mut offset = HEADER_SIZE;

        while offset < bytes.len() {
            if bytes.len() - offset < ATTR_HEADER_SIZE {
                return Err(StunError::AttributeTooShort { offset });
            }

            let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let attr_length = usize::from(u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]));
            offset += ATTR_HEADER_SIZE;

            let remaining = bytes.len() - offset;
            if attr_length > remaining {
                return Err(StunError::AttributeLengthMismatch {
                    attr_type,
                    declared: attr_length,
                    remaining,
                });
            }

            attributes.insert(attr_type, bytes[offset..offset + attr_length].to_vec());
            offset += attr_length + padding(attr_length);
        }

        Ok(Self {
            message_type: MessageType::from(msg_type),
            transaction_id,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: [u8; 12] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
    ];

    fn header(msg_type: u16, length: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&msg_type.to_be_bytes());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        buf.extend_from_slice(&TXID);
        buf
    }

    #[test]
    fn test_magic_cookie() {
        assert_eq!(MAGIC_COOKIE.to_be_bytes(), [0x21, 0x12, 0xA4, 0x42]);
    }

    #[test]
    fn test_message_type_encoding() {
        assert_eq!(
            MessageType::compose(METHOD_BINDING, MessageClass::Request),
            MessageType::BindingRequest
        );
        assert_eq!(
            MessageType::compose(METHOD_BINDING, MessageClass::SuccessResponse),
            MessageType::BindingResponse
        );
        assert_eq!(
            MessageType::compose(METHOD_BINDING, MessageClass::ErrorResponse).as_u16(),
            0x0111
        );
    }

    #[test]
    fn test_message_class_and_method() {
        assert_eq!(MessageType::BindingRequest.class(), MessageClass::Request);
        assert_eq!(
            MessageType::BindingResponse.class(),
            MessageClass::SuccessResponse
        );
        assert_eq!(MessageType::from(0x0011).class(), MessageClass::Indication);
        assert_eq!(MessageType::BindingResponse.method(), METHOD_BINDING);

        for class in [
            MessageClass::Request,
            MessageClass::Indication,
            MessageClass::SuccessResponse,
            MessageClass::ErrorResponse,
        ] {
            let t = MessageType::compose(0x0ABC, class);
            assert_eq!(t.class(), class);
            assert_eq!(t.method(), 0x0ABC);
        }
    }

    #[test]
    fn test_other_type_preserved() {
        let msg = StunMessage::new(MessageType::from(0x0003), TXID);
        let decoded = StunMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.message_type, MessageType::Other(0x0003));
    }

    #[test]
    fn test_encode_header_layout() {
        let msg = StunMessage::new(MessageType::BindingRequest, TXID);
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded, header(0x0001, 0));
    }

    #[test]
    fn test_encode_pads_attributes() {
        let mut msg = StunMessage::new(MessageType::BindingRequest, TXID);
        msg.set_attribute(ATTR_SOFTWARE, b"abc".to_vec()).unwrap();
        let encoded = msg.encode().unwrap();

        assert_eq!(encoded.len(), HEADER_SIZE + 8);
        assert_eq!(&encoded[2..4], &8u16.to_be_bytes());
        // Unpadded length on the wire
        assert_eq!(&encoded[22..24], &3u16.to_be_bytes());
        assert_eq!(&encoded[24..28], &[b'a', b'b', b'c', 0]);
    }

    #[test]
    fn test_stun_message_roundtrip() {
        let mut msg = StunMessage::binding_request();
        msg.set_attribute(0x0006, b"user".to_vec()).unwrap();
        msg.set_attribute(ATTR_SOFTWARE, b"lodestar".to_vec()).unwrap();
        msg.set_attribute(0x8000, vec![7; 5]).unwrap();
        msg.set_attribute(0x8001, Vec::new()).unwrap();

        let decoded = StunMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_multiple_attributes() {
        let mut buf = header(0x0001, 16);
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04]);
        buf.extend_from_slice(&[0x00, 0x02, 0x00, 0x04, 0x05, 0x06, 0x07, 0x08]);

        let msg = StunMessage::decode(&buf).unwrap();
        assert!(msg.is_binding_request());
        assert_eq!(msg.transaction_id, TXID);
        assert_eq!(msg.attribute(0x0001), Some(&[1, 2, 3, 4][..]));
        assert_eq!(msg.attribute(0x0002), Some(&[5, 6, 7, 8][..]));
    }

    #[test]
    fn test_decode_no_attributes() {
        let msg = StunMessage::decode(&header(0x0001, 0)).unwrap();
        assert_eq!(msg.attribute_count(), 0);
    }

    #[test]
    fn test_decode_strips_padding() {
        let mut buf = header(0x0001, 8);
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x03, 0x01, 0x02, 0x03, 0x00]);

        let msg = StunMessage::decode(&buf).unwrap();
        assert_eq!(msg.attribute(0x0001), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn test_decode_final_attribute_without_padding() {
        let mut buf = header(0x0001, 7);
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x03, 0x01, 0x02, 0x03]);

        let msg = StunMessage::decode(&buf).unwrap();
        assert_eq!(msg.attribute(0x0001), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn test_decode_duplicate_attribute_last_wins() {
        let mut buf = header(0x0001, 16);
        buf.extend_from_slice(&[0x00, 0x09, 0x00, 0x04, 0xAA, 0xAA, 0xAA, 0xAA]);
        buf.extend_from_slice(&[0x00, 0x09, 0x00, 0x04, 0xBB, 0xBB, 0xBB, 0xBB]);

        let msg = StunMessage::decode(&buf).unwrap();
        assert_eq!(msg.attribute_count(), 1);
        assert_eq!(msg.attribute(0x0009), Some(&[0xBB; 4][..]));
    }

    #[test]
    fn test_decode_error_too_short() {
        assert!(matches!(
            StunMessage::decode(&[]),
            Err(StunError::PacketTooShort { len: 0 })
        ));
        assert!(matches!(
            StunMessage::decode(&[0u8; 19]),
            Err(StunError::PacketTooShort { len: 19 })
        ));
    }

    #[test]
    fn test_decode_error_invalid_magic_cookie() {
        let mut buf = header(0x0001, 0);
        buf[4..8].copy_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            StunMessage::decode(&buf),
            Err(StunError::MagicCookieMismatch(0))
        ));
    }

    #[test]
    fn test_decode_error_length_mismatch() {
        // Claims more than is present
        let buf = header(0x0001, 100);
        assert!(matches!(
            StunMessage::decode(&buf),
            Err(StunError::LengthMismatch {
                declared: 100,
                actual: 0
            })
        ));

        // Trailing garbage
        let mut buf = header(0x0001, 0);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            StunMessage::decode(&buf),
            Err(StunError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_error_attribute_too_short() {
        let mut buf = header(0x0001, 2);
        buf.extend_from_slice(&[0x00, 0x01]);
        let err = StunMessage::decode(&buf).unwrap_err();
        assert!(matches!(err, StunError::AttributeTooShort { offset: 20 }));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_decode_error_attribute_overrun() {
        let mut buf = header(0x0001, 8);
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x0A, 0x01, 0x02, 0x03, 0x04]);
        assert!(matches!(
            StunMessage::decode(&buf),
            Err(StunError::AttributeLengthMismatch {
                attr_type: 0x0001,
                declared: 10,
                remaining: 4
            })
        ));
    }

    #[test]
    fn test_set_attribute_too_large() {
        let mut msg = StunMessage::new(MessageType::BindingRequest, TXID);
        let result = msg.set_attribute(0x8000, vec![0; 70_000]);
        assert!(matches!(result, Err(StunError::AttributeTooLarge(70_000))));
    }

    #[test]
    fn test_encode_message_too_large() {
        let mut msg = StunMessage::new(MessageType::BindingRequest, TXID);
        msg.set_attribute(0x8000, vec![0; 40_000]).unwrap();
        msg.set_attribute(0x8001, vec![0; 40_000]).unwrap();
        assert!(matches!(msg.encode(), Err(StunError::MessageTooLarge(_))));
    }

    #[test]
    fn test_xor_mapped_address_attribute() {
        let addr: SocketAddr = "192.0.2.1:32853".parse().unwrap();
        let mut msg = StunMessage::binding_response(TXID);
        msg.set_xor_mapped_address(addr, Ipv6XorMode::default());

        let decoded = StunMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            decoded.xor_mapped_address(Ipv6XorMode::default()).unwrap(),
            addr
        );
    }

    #[test]
    fn test_xor_mapped_address_missing() {
        let msg = StunMessage::binding_response(TXID);
        assert!(matches!(
            msg.xor_mapped_address(Ipv6XorMode::default()),
            Err(StunError::MissingAttribute(ATTR_XOR_MAPPED_ADDRESS))
        ));
    }

    #[test]
    fn test_binding_request_random_txid() {
        let a = StunMessage::binding_request();
        let b = StunMessage::binding_request();
        assert_ne!(a.transaction_id, b.transaction_id);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn encoded_attributes_are_aligned(lens in prop::collection::vec(0usize..40, 0..6)) {
                let mut msg = StunMessage::binding_response(TXID);
                for (i, len) in lens.iter().enumerate() {
                    msg.set_attribute(0x8000 + i as u16, vec![0x5A; *len]).unwrap();
                }

                let encoded = msg.encode().unwrap();
                prop_assert_eq!(encoded.len() % 4, 0);
                prop_assert_eq!(StunMessage::decode(&encoded).unwrap(), msg);
            }

            #[test]
            fn truncation_is_rejected(cut in 1usize..12) {
                let mut msg = StunMessage::binding_response(TXID);
                msg.set_xor_mapped_address("192.0.2.1:3478".parse().unwrap(), Ipv6XorMode::default());
                let encoded = msg.encode().unwrap();
                prop_assert!(StunMessage::decode(&encoded[..encoded.len() - cut]).is_err());
            }
        }
    }
}
