//! Fuzz target for the STUN responder
//!
//! Any reply the responder produces must itself be a well-formed message.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lodestar_stun::{StunMessage, StunResponder};
use std::net::SocketAddr;

fuzz_target!(|data: &[u8]| {
    let responder = StunResponder::default();
    let source: SocketAddr = "203.0.113.7:40000".parse().unwrap();

    if let Some(reply) = responder.respond(data, source) {
        let msg = StunMessage::decode(&reply).expect("reply decodes");
        assert!(msg.xor_mapped_address(Default::default()).is_ok());
    }
});
