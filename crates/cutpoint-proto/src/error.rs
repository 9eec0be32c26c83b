//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame did not start with the protocol magic.
    #[error("bad magic: {found:02x?}")]
    BadMagic {
        /// The four bytes found instead
        found: [u8; 4],
    },

    /// Frame carries a version this build does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Declared payload exceeds the maximum frame size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared payload size
        size: usize,
        /// Maximum allowed payload size
        max: usize,
    },

    /// Fewer bytes were available than the frame requires.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Payload is not a valid message.
    #[error("decode failed: {0}")]
    Decode(String),
}
