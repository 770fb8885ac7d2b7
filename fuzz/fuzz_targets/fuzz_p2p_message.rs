//! Fuzz target for wire message decoding.
//!
//! Any message that decodes must survive an encode/decode cycle unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = greams_p2p::Message::decode(data) {
        let encoded = message.encode().expect("decoded message re-encodes");
        let again = greams_p2p::Message::decode(&encoded).expect("re-decode");
        assert_eq!(again, message);
        let _ = greams_p2p::parse_peer_url(&message.url);
    }
});
