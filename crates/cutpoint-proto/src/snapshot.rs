//! Snapshot payload types.
//!
//! These travel inside [`crate::Message::SnapshotResult`] from every
//! participant back to the snapshot initiator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Address, ProcessId};

/// Whether a process is operating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Process is running
    #[default]
    On,
    /// Process has been stopped
    Off,
}

/// Local application state captured by snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationState {
    /// Number of local events generated so far
    pub counter: u64,
    /// Operating status
    pub status: Status,
}

/// A process's recorded state at the moment it joined a snapshot round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    /// Process the state belongs to
    pub process_id: ProcessId,
    /// Copy of the application state
    pub state: ApplicationState,
    /// Lamport clock value at capture time
    pub clock: u64,
}

/// An application message recorded as in flight on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMessage {
    /// Message payload
    pub payload: String,
    /// Sender's Lamport timestamp
    pub timestamp: u64,
}

/// One process's contribution to a global snapshot.
///
/// `channels` is keyed by the sender address of each incoming channel and
/// holds, in arrival order, the messages received on that channel between the
/// local capture and the channel's marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Recorded local state
    pub local: LocalSnapshot,
    /// Recorded incoming channel states
    pub channels: BTreeMap<Address, Vec<RecordedMessage>>,
}

impl ProcessSnapshot {
    /// Total number of in-flight messages recorded across all channels.
    pub fn in_flight(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }
}
