//! Fuzz target for pkt-line parsing.
//!
//! The reader must reject malformed input with an error, never a panic, and
//! every packet it yields must re-encode to the bytes it was read from
//! (modulo the case of the hex length).

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = greams_git::PktLineReader::new(Cursor::new(data));
    let mut offset = 0usize;

    // Bounded to keep crafted inputs cheap
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(pkt)) => {
                let encoded = pkt.encode().expect("decoded packet re-encodes");
                let input = &data[offset..offset + encoded.len()];
                assert!(input[..4].eq_ignore_ascii_case(&encoded[..4]));
                assert_eq!(&input[4..], &encoded[4..]);
                offset += encoded.len();
            }
            Ok(None) | Err(_) => break,
        }
    }
});
