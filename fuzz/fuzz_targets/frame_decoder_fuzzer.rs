//! Fuzz target for the frame decoder
//!
//! Every byte sequence a peer can send must decode to a message or an error.
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary input handed to [`Message::decode`]
//! - Valid header, arbitrary body: exercises the CBOR decoder behind a header
//!   that passes validation
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A decoded message re-encodes and decodes to itself

#![no_main]

use arbitrary::Arbitrary;
use cutpoint_proto::{FrameHeader, Message};
use zerocopy::IntoBytes;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Input {
    Raw(Vec<u8>),
    Body(Vec<u8>),
}

fuzz_target!(|input: Input| {
    let frame = match input {
        Input::Raw(bytes) => bytes,
        Input::Body(body) => {
            let Ok(size) = u32::try_from(body.len()) else {
                return;
            };
            let mut frame = FrameHeader::new(size).as_bytes().to_vec();
            frame.extend_from_slice(&body);
            frame
        },
    };

    let Ok(message) = Message::decode(&frame) else {
        return;
    };
    let encoded = message.encode().expect("decoded message must re-encode");
    assert_eq!(Message::decode(&encoded).expect("re-encoded frame must decode"), message);
});
