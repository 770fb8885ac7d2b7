//! Fuzz target for upload-pack request and ref advertisement parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = greams_git::UploadRequest::parse(data) {
        // A parsed request re-encodes and parses to the same wants and haves
        if let Ok(encoded) = request.encode() {
            let again = greams_git::UploadRequest::parse(&encoded).expect("re-parse");
            assert_eq!(again.wants, request.wants);
            assert_eq!(again.haves, request.haves);
        }
    }

    let _ = greams_git::parse_ref_advertisement(data);
});
