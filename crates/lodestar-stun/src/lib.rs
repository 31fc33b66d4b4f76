//! # Lodestar STUN
//!
//! The STUN (RFC 5389) subset Lodestar speaks: Binding requests answered with
//! an XOR-MAPPED-ADDRESS so a peer can learn its server-reflexive address.
//!
//! This crate provides:
//! - [`StunMessage`] wire codec with 4-byte attribute alignment
//! - XOR-MAPPED-ADDRESS encoding in [`xor_address`]
//! - [`StunResponder`], a [`DatagramHandler`](lodestar_transport::DatagramHandler)
//!   that answers Binding requests on a [`UdpMultiplexer`](lodestar_transport::UdpMultiplexer)
//! - [`StunRateLimiter`] for per-IP request limiting
//! - [`StunClient`] for probing a responder

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod message;
pub mod rate_limit;
pub mod responder;
pub mod xor_address;

pub use client::StunClient;
pub use error::StunError;
pub use message::{MAGIC_COOKIE, MessageClass, MessageType, StunMessage};
pub use rate_limit::StunRateLimiter;
pub use responder::{ResponderConfig, ResponderStats, StunResponder};
pub use xor_address::Ipv6XorMode;
