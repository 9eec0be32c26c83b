//! Cutpoint wire protocol.
//!
//! Every connection between two processes carries exactly one frame: a fixed
//! 12-byte [`FrameHeader`] followed by a CBOR-encoded [`Message`].
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬───────────────────┐
//! │ "CUTP"   │ version │ reserved │ payload_size (BE) │  12 bytes
//! ├──────────┴─────────┴──────────┴───────────────────┤
//! │ CBOR body (one `Message`)                         │  payload_size bytes
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! The tag of the CBOR body discriminates the message variant. Messages are
//! immutable once encoded; receivers never see partial frames.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod identity;
mod message;
mod snapshot;

pub use error::ProtocolError;
pub use frame::{FrameHeader, MAX_PAYLOAD_SIZE};
pub use identity::{Address, ProcessId, ProcessIdentity};
pub use message::{Message, MessageTag};
pub use snapshot::{ApplicationState, LocalSnapshot, ProcessSnapshot, RecordedMessage, Status};
