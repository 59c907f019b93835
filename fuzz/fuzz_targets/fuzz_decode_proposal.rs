#![no_main]

use bedrock_types::codec::decode_proposal;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The proposal decoder recurses through block, header, and justify-QC
    // submessages. Every path must reject malformed input without panicking.
    let _ = decode_proposal(data);
});
