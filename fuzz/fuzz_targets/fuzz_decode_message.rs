#![no_main]

use bedrock_wire::decode_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // decode_message parses a type byte followed by a canonical-codec payload
    // into a Proposal, Vote, or TimeoutMessage. It must never panic on
    // arbitrary input, returning a typed error for anything it cannot decode.
    let _ = decode_message(data);
});
