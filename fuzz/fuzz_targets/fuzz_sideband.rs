//! Fuzz target for side-band muxing and demuxing.

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    small: bool,
    pack: Vec<u8>,
    raw: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // Arbitrary bytes never panic the demuxer
    let _ = greams_git::demux(&input.raw);

    let side_band = if input.small {
        greams_git::SideBand::Small
    } else {
        greams_git::SideBand::Large
    };
    let pack = Bytes::from(input.pack);
    let muxed = greams_git::mux(side_band, ["NAK\n"], pack.clone()).expect("mux");
    let framed = futures::executor::block_on(muxed.collect_bytes()).expect("collect");
    let demuxed = greams_git::demux(&framed).expect("demux");
    assert_eq!(demuxed.packfile, pack);
});
