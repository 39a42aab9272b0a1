#![no_main]

use bytes::Bytes;
use duplex_transport::codec::{decode_frame, frame_with_length_prefix, LengthPrefixedReassembler};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The frame body decoder must never panic on arbitrary input, only
    // return a `CodecError`.
    let _ = decode_frame(data);

    // The length-prefix reassembler must never panic either, including on
    // data fed in single-byte fragments (the worst case for its staging
    // buffer).
    let mut reassembler = LengthPrefixedReassembler::new();
    for chunk in data.chunks(1) {
        reassembler.push(Bytes::copy_from_slice(chunk));
        loop {
            match reassembler.next_message() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }

    // Round-trip: a validly length-prefixed, valid frame body must decode
    // back out unchanged in shape.
    if data.len() <= 4 {
        return;
    }
    let wire = frame_with_length_prefix(data);
    let mut reassembler = LengthPrefixedReassembler::new();
    reassembler.push(wire);
    if let Ok(Some(body)) = reassembler.next_message() {
        assert_eq!(body.as_ref(), data);
    }
});
