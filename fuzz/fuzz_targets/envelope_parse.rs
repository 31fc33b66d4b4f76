//! Fuzz target for signaling envelope parsing
//!
//! Tests that parsing and validation handle arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lodestar_signaling::SignalingEnvelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(env) = SignalingEnvelope::parse(data) {
        let _ = env.validate_inbound();
        let _ = env.to_json();
    }
});
