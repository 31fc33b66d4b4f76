//! XOR-MAPPED-ADDRESS attribute encoding.
//!
//! ```text
//! +--------+--------+-----------------+
//! |   0    | family |  port ^ 0x2112  |
//! +--------+--------+-----------------+
//! |     address ^ key (4 or 16 bytes)  |
//! +-----------------------------------+
//! ```
//!
//! The port is XORed with the top 16 bits of the magic cookie. IPv4 address
//! bytes are XORed with the cookie. How IPv6 address bytes are keyed depends
//! on [`Ipv6XorMode`].

use crate::error::StunError;
use crate::message::MAGIC_COOKIE;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// IPv4 address family
pub const FAMILY_IPV4: u8 = 0x01;

/// IPv6 address family
pub const FAMILY_IPV6: u8 = 0x02;

/// Key used to XOR IPv6 address bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ipv6XorMode {
    /// All 16 bytes XORed with the magic cookie repeated (`cookie[i % 4]`).
    ///
    /// Matches deployed Lodestar clients. Not what RFC 5389 specifies for
    /// IPv6.
    #[default]
    CookieOnly,
    /// RFC 5389 Section 15.2: magic cookie followed by the transaction ID.
    Rfc5389,
}

fn xor_key(transaction_id: &[u8; 12], mode: Ipv6XorMode) -> [u8; 16] {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let mut key = [0u8; 16];
    match mode {
        Ipv6XorMode::CookieOnly => {
            for (i, k) in key.iter_mut().enumerate() {
                *k = cookie[i % 4];
            }
        }
        Ipv6XorMode::Rfc5389 => {
            key[..4].copy_from_slice(&cookie);
            key[4..].copy_from_slice(transaction_id);
        }
    }
    key
}

/// Encode `addr` as an XOR-MAPPED-ADDRESS value.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`), as seen on dual-stack
/// sockets, are reported as IPv4.
#[must_use]
pub fn encode(addr: SocketAddr, transaction_id: &[u8; 12], mode: Ipv6XorMode) -> Vec<u8> {
    let xor_port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    let key = xor_key(transaction_id, mode);

    let ip = match addr.ip() {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    };

    let mut value = Vec::with_capacity(20);
    value.push(0); // Reserved
    match ip {
        IpAddr::V4(v4) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&xor_port.to_be_bytes());
            value.extend(v4.octets().iter().zip(key.iter()).map(|(b, k)| b ^ k));
        }
        IpAddr::V6(v6) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&xor_port.to_be_bytes());
            value.extend(v6.octets().iter().zip(key.iter()).map(|(b, k)| b ^ k));
        }
    }
    value
}

/// Decode an XOR-MAPPED-ADDRESS value.
///
/// # Errors
///
/// Returns `StunError::InvalidAttribute` for an unknown family or a value
/// whose length does not match its family.
pub fn decode(
    value: &[u8],
    transaction_id: &[u8; 12],
    mode: Ipv6XorMode,
) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::InvalidAttribute("XOR-MAPPED-ADDRESS too short"));
    }

    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
    let key = xor_key(transaction_id, mode);
    let addr = &value[4..];

    let ip = match family {
        FAMILY_IPV4 => {
            if addr.len() != 4 {
                return Err(StunError::InvalidAttribute(
                    "XOR-MAPPED-ADDRESS IPv4 length",
                ));
            }
            let mut octets = [0u8; 4];
            for (i, o) in octets.iter_mut().enumerate() {
                *o = addr[i] ^ key[i];
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_IPV6 => {
            if addr.len() != 16 {
                return Err(StunError::InvalidAttribute(
                    "XOR-MAPPED-ADDRESS IPv6 length",
                ));
            }
            let mut octets = [0u8; 16];
            for (i, o) in octets.iter_mut().enumerate() {
                *o = addr[i] ^ key[i];
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => {
            return Err(StunError::InvalidAttribute(
                "XOR-MAPPED-ADDRESS unknown family",
            ));
        }
    };

    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: [u8; 12] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
    ];

    #[test]
    fn test_ipv4_known_vector() {
        // RFC 5769 Section 2.2: 192.0.2.1:32853
        let addr: SocketAddr = "192.0.2.1:32853".parse().unwrap();
        let value = encode(addr, &TXID, Ipv6XorMode::CookieOnly);
        assert_eq!(
            hex::encode(&value),
            "0001a147e112a643"
        );
    }

    #[test]
    fn test_ipv4_same_in_both_modes() {
        let addr: SocketAddr = "203.0.113.9:3478".parse().unwrap();
        assert_eq!(
            encode(addr, &TXID, Ipv6XorMode::CookieOnly),
            encode(addr, &TXID, Ipv6XorMode::Rfc5389)
        );
    }

    #[test]
    fn test_ipv6_cookie_only_repeats_cookie() {
        let addr: SocketAddr = "[::]:0".parse().unwrap();
        let value = encode(addr, &TXID, Ipv6XorMode::CookieOnly);
        assert_eq!(value[1], FAMILY_IPV6);
        assert_eq!(&value[4..8], &[0x21, 0x12, 0xA4, 0x42]);
        assert_eq!(&value[16..20], &[0x21, 0x12, 0xA4, 0x42]);
    }

    #[test]
    fn test_ipv6_rfc5389_uses_transaction_id() {
        let addr: SocketAddr = "[::]:0".parse().unwrap();
        let value = encode(addr, &TXID, Ipv6XorMode::Rfc5389);
        assert_eq!(&value[4..8], &[0x21, 0x12, 0xA4, 0x42]);
        assert_eq!(&value[8..20], &TXID);
    }

    #[test]
    fn test_ipv6_roundtrip_each_mode() {
        let addr: SocketAddr = "[2001:db8:1234:5678:11:2233:4455:6677]:32853".parse().unwrap();
        for mode in [Ipv6XorMode::CookieOnly, Ipv6XorMode::Rfc5389] {
            let value = encode(addr, &TXID, mode);
            assert_eq!(value.len(), 20);
            assert_eq!(decode(&value, &TXID, mode).unwrap(), addr);
        }
    }

    #[test]
    fn test_ipv4_mapped_reported_as_ipv4() {
        let addr: SocketAddr = "[::ffff:198.51.100.7]:5000".parse().unwrap();
        let value = encode(addr, &TXID, Ipv6XorMode::CookieOnly);
        assert_eq!(value[1], FAMILY_IPV4);
        assert_eq!(
            decode(&value, &TXID, Ipv6XorMode::CookieOnly).unwrap(),
            "198.51.100.7:5000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_bad_values() {
        assert!(decode(&[0, 1], &TXID, Ipv6XorMode::CookieOnly).is_err());
        assert!(decode(&[0, 1, 0, 0, 1, 2], &TXID, Ipv6XorMode::CookieOnly).is_err());
        assert!(decode(&[0, 2, 0, 0, 1, 2, 3, 4], &TXID, Ipv6XorMode::CookieOnly).is_err());
        assert!(decode(&[0, 9, 0, 0, 1, 2, 3, 4], &TXID, Ipv6XorMode::CookieOnly).is_err());
    }
}
