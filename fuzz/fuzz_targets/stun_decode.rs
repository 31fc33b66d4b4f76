//! Fuzz target for STUN message decoding
//!
//! The decoder must return Ok or Err for any input, and whatever it accepts
//! must survive a re-encode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lodestar_stun::StunMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = StunMessage::decode(data) {
        // Padding a trailing attribute can push a maximal message over the limit.
        let Ok(encoded) = msg.encode() else {
            return;
        };
        let again = StunMessage::decode(&encoded).expect("re-encoded message decodes");
        assert_eq!(again, msg);
    }
});
