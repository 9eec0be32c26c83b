//! Protocol messages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Address, ProcessId, ProcessSnapshot};

/// Discriminant of a [`Message`], used for routing and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// Application message
    App,
    /// Bully election request
    Election,
    /// Bully election acknowledgement
    ElectionOk,
    /// Bully coordinator announcement
    Coordinator,
    /// Ring election token
    RingElection,
    /// Ring coordinator announcement
    RingCoordinator,
    /// Chandy-Lamport marker
    Marker,
    /// Per-process snapshot contribution
    SnapshotResult,
}

impl MessageTag {
    /// Wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "APP",
            Self::Election => "ELECTION",
            Self::ElectionOk => "ELECTION_OK",
            Self::Coordinator => "COORDINATOR",
            Self::RingElection => "RING_ELECTION",
            Self::RingCoordinator => "RING_COORDINATOR",
            Self::Marker => "MARKER",
            Self::SnapshotResult => "SNAPSHOT_RESULT",
        }
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message. Each variant carries exactly what its handler needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Application message stamped with the sender's Lamport clock.
    App {
        /// Sender address
        from: Address,
        /// Sender's clock value at send time
        timestamp: u64,
        /// Opaque payload
        payload: String,
    },

    /// Bully: "I am holding an election", sent to every higher id.
    Election {
        /// Sender address (reply target)
        from: Address,
        /// Sender id
        from_id: ProcessId,
    },

    /// Bully: "I am alive and outrank you".
    ElectionOk {
        /// Sender address
        from: Address,
        /// Sender id
        from_id: ProcessId,
    },

    /// Bully: "I am the coordinator".
    Coordinator {
        /// Sender address
        from: Address,
        /// The new coordinator, which is the sender
        from_id: ProcessId,
    },

    /// Ring: election token collecting the ids of every member it visits.
    RingElection {
        /// Address of the member that forwarded the token
        from: Address,
        /// Ids visited so far, initiator first
        token: Vec<ProcessId>,
    },

    /// Ring: result announcement circulated once around the ring.
    RingCoordinator {
        /// Address of the member that forwarded the announcement
        from: Address,
        /// Elected coordinator
        coordinator_id: ProcessId,
        /// Member that launched the announcement; it stops here
        initiator: ProcessId,
    },

    /// Chandy-Lamport marker.
    Marker {
        /// Sender address; identifies the channel the marker closes
        from: Address,
        /// Address collecting the snapshot
        initiator: Address,
    },

    /// A participant's recorded state, sent to the initiator.
    SnapshotResult {
        /// Sender address
        from: Address,
        /// Recorded local state and channel states
        snapshot: ProcessSnapshot,
    },
}

impl Message {
    /// Tag of this message.
    pub fn tag(&self) -> MessageTag {
        match self {
            Self::App { .. } => MessageTag::App,
            Self::Election { .. } => MessageTag::Election,
            Self::ElectionOk { .. } => MessageTag::ElectionOk,
            Self::Coordinator { .. } => MessageTag::Coordinator,
            Self::RingElection { .. } => MessageTag::RingElection,
            Self::RingCoordinator { .. } => MessageTag::RingCoordinator,
            Self::Marker { .. } => MessageTag::Marker,
            Self::SnapshotResult { .. } => MessageTag::SnapshotResult,
        }
    }

    /// Address of the process that sent this message.
    pub fn sender(&self) -> &Address {
        match self {
            Self::App { from, .. }
            | Self::Election { from, .. }
            | Self::ElectionOk { from, .. }
            | Self::Coordinator { from, .. }
            | Self::RingElection { from, .. }
            | Self::RingCoordinator { from, .. }
            | Self::Marker { from, .. }
            | Self::SnapshotResult { from, .. } => from,
        }
    }
}
