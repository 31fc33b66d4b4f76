//! # Lodestar Transport
//!
//! UDP transport layer for the Lodestar STUN responder.
//!
//! This crate provides:
//! - A single-socket [`UdpMultiplexer`] that demultiplexes datagrams into
//!   per-source-address [`VirtualUdpConnection`]s with idle eviction
//! - The [`DatagramHandler`] seam protocol layers plug into
//! - A bounded [`BufferPool`] for receive buffers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod mux;
pub mod pool;

pub use connection::{DatagramHandler, VirtualUdpConnection};
pub use error::{TransportError, TransportResult};
pub use mux::{MuxConfig, MuxStats, UdpMultiplexer};
pub use pool::{BufferPool, PooledBuffer};
