//! Frame codec.
//!
//! A frame is a [`FrameHeader`] followed by `payload_size` bytes of CBOR. The
//! header is parsed zero-copy so a receiver can size its read before touching
//! the body.

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U32},
};

use crate::{Message, ProtocolError};

/// Largest accepted payload (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;

const MAGIC: [u8; 4] = *b"CUTP";
const VERSION: u8 = 1;

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    magic: [u8; 4],
    version: u8,
    reserved: [u8; 3],
    payload_size: U32<BigEndian>,
}

impl FrameHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 12;

    /// Header for a payload of `payload_size` bytes.
    pub fn new(payload_size: u32) -> Self {
        Self { magic: MAGIC, version: VERSION, reserved: [0; 3], payload_size: U32::new(payload_size) }
    }

    /// Parse and validate a header from exactly [`Self::SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = Self::read_from_bytes(bytes)
            .map_err(|_| ProtocolError::Truncated { expected: Self::SIZE, actual: bytes.len() })?;

        if header.magic != MAGIC {
            return Err(ProtocolError::BadMagic { found: header.magic });
        }
        if header.version != VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let size = header.payload_size();
        if size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge { size, max: MAX_PAYLOAD_SIZE });
        }

        Ok(header)
    }

    /// Declared payload size.
    pub fn payload_size(&self) -> usize {
        self.payload_size.get() as usize
    }
}

impl Message {
    /// Encode this message as a complete frame (header and body).
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut body = Vec::new();
        ciborium::ser::into_writer(self, &mut body)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;

        let size = u32::try_from(body.len())
            .ok()
            .filter(|size| (*size as usize) <= MAX_PAYLOAD_SIZE)
            .ok_or(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_PAYLOAD_SIZE })?;

        let mut frame = BytesMut::with_capacity(FrameHeader::SIZE + body.len());
        frame.put_slice(FrameHeader::new(size).as_bytes());
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    /// Decode a complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let header_bytes = frame.get(..FrameHeader::SIZE).ok_or(ProtocolError::Truncated {
            expected: FrameHeader::SIZE,
            actual: frame.len(),
        })?;
        let header = FrameHeader::from_bytes(header_bytes)?;

        let end = FrameHeader::SIZE + header.payload_size();
        let payload = frame
            .get(FrameHeader::SIZE..end)
            .ok_or(ProtocolError::Truncated { expected: end, actual: frame.len() })?;

        Self::decode_payload(payload)
    }

    /// Decode a CBOR body whose header was already validated.
    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        ciborium::de::from_reader(payload).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;
    use crate::{Address, ApplicationState, LocalSnapshot, ProcessSnapshot, RecordedMessage};

    #[test]
    fn header_layout() {
        let header = FrameHeader::new(0x0102);
        assert_eq!(header.as_bytes(), hex!("43555450 01 000000 00000102"));
        assert_eq!(FrameHeader::SIZE, std::mem::size_of::<FrameHeader>());
    }

    #[test]
    fn header_rejects_bad_magic() {
        let result = FrameHeader::from_bytes(&hex!("48545450 01 000000 00000000"));
        assert_eq!(result, Err(ProtocolError::BadMagic { found: *b"HTTP" }));
    }

    #[test]
    fn header_rejects_unknown_version() {
        let result = FrameHeader::from_bytes(&hex!("43555450 07 000000 00000000"));
        assert_eq!(result, Err(ProtocolError::UnsupportedVersion(7)));
    }

    #[test]
    fn header_rejects_oversized_payload() {
        let result = FrameHeader::from_bytes(&hex!("43555450 01 000000 00100001"));
        assert_eq!(
            result,
            Err(ProtocolError::FrameTooLarge { size: MAX_PAYLOAD_SIZE + 1, max: MAX_PAYLOAD_SIZE })
        );
    }

    #[test]
    fn decode_rejects_short_header() {
        let result = Message::decode(&hex!("435554"));
        assert_eq!(result, Err(ProtocolError::Truncated { expected: 12, actual: 3 }));
    }

    #[test]
    fn decode_rejects_missing_body() {
        let frame = Message::App { from: Address::from("a:1"), timestamp: 7, payload: "hi".into() }
            .encode()
            .expect("encode");

        let result = Message::decode(&frame[..frame.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn decode_rejects_garbage_body() {
        let mut frame = FrameHeader::new(3).as_bytes().to_vec();
        frame.extend_from_slice(&[0xff, 0xff, 0xff]);

        assert!(matches!(Message::decode(&frame), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn snapshot_result_survives_framing() {
        let mut channels = BTreeMap::new();
        channels.insert(
            Address::from("b:2"),
            vec![RecordedMessage { payload: "msg from 2".into(), timestamp: 11 }],
        );
        channels.insert(Address::from("c:3"), Vec::new());

        let message = Message::SnapshotResult {
            from: Address::from("a:1"),
            snapshot: ProcessSnapshot {
                local: LocalSnapshot {
                    process_id: 1,
                    state: ApplicationState { counter: 4, ..Default::default() },
                    clock: 12,
                },
                channels,
            },
        };

        let frame = message.encode().expect("encode");
        let header = FrameHeader::from_bytes(&frame[..FrameHeader::SIZE]).expect("header");
        assert_eq!(header.payload_size(), frame.len() - FrameHeader::SIZE);
        assert_eq!(Message::decode(&frame).expect("decode"), message);
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = Message::decode(&bytes);
        }

        #[test]
        fn decode_never_panics_behind_valid_header(body in proptest::collection::vec(any::<u8>(), 0..256)) {
            let size = u32::try_from(body.len()).expect("small body");
            let mut frame = FrameHeader::new(size).as_bytes().to_vec();
            frame.extend_from_slice(&body);
            let _ = Message::decode(&frame);
        }
    }
}
