#![no_main]

use bedrock_wire::decode_envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The envelope decoder enforces the outer bound and per-type size limits
    // before touching the payload. It must never panic on arbitrary input.
    let _ = decode_envelope(data);
});
