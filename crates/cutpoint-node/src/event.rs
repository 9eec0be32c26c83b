//! Observable process events.
//!
//! Every significant transition is published on the process's event channel
//! and logged. Test harnesses and the demo driver subscribe to the channel;
//! everything else reads the log.

use cutpoint_core::{election::ElectionAlgorithm, snapshot::GlobalSnapshot};
use cutpoint_proto::{Address, LocalSnapshot, MessageTag, ProcessId, ProcessSnapshot};

/// One significant state transition of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Listener bound and background tasks running
    Started {
        /// Address the process listens on
        address: Address,
    },

    /// All background tasks have exited
    Stopped,

    /// A local event advanced the application state
    InternalEvent {
        /// Counter after the event
        counter: u64,
        /// Clock value carried by the resulting `APP` broadcast
        clock: u64,
    },

    /// A message was delivered to a peer
    MessageSent {
        /// Recipient
        to: Address,
        /// Message kind
        tag: MessageTag,
    },

    /// An inbound message was applied
    MessageReceived {
        /// Sender
        from: Address,
        /// Message kind
        tag: MessageTag,
    },

    /// A peer could not be reached; the message was dropped
    SendFailed {
        /// Intended recipient
        to: Address,
        /// Message kind
        tag: MessageTag,
        /// Transport error text
        reason: String,
    },

    /// An inbound connection or message was rejected
    ProtocolViolation {
        /// Sender, if the message decoded far enough to tell
        from: Option<Address>,
        /// What was wrong
        reason: String,
    },

    /// The believed coordinator did not answer a probe
    CoordinatorFailureDetected {
        /// Coordinator that was probed
        coordinator_id: ProcessId,
    },

    /// This process started an election
    ElectionStarted {
        /// Algorithm
        algorithm: ElectionAlgorithm,
        /// Local round number
        round: u64,
    },

    /// A higher process answered `ELECTION_OK`
    ElectionDeferred {
        /// Process that answered
        to: ProcessId,
    },

    /// This process won an election
    ElectedSelf {
        /// Algorithm
        algorithm: ElectionAlgorithm,
    },

    /// A ring token this process started came back
    RingTokenReturned {
        /// Ids collected, initiator first
        token: Vec<ProcessId>,
        /// Maximum id in the token
        coordinator_id: ProcessId,
    },

    /// This process adopted a coordinator
    CoordinatorAcknowledged {
        /// New coordinator
        coordinator_id: ProcessId,
        /// Coordinator believed before
        previous: ProcessId,
        /// Algorithm that produced it
        algorithm: ElectionAlgorithm,
    },

    /// An election timed out without a result
    ElectionAbandoned {
        /// Algorithm
        algorithm: ElectionAlgorithm,
        /// Local round number
        round: u64,
    },

    /// Local state captured for a snapshot round
    SnapshotRecorded(LocalSnapshot),

    /// Every incoming channel delivered its marker
    SnapshotCompleted(ProcessSnapshot),

    /// The initiator assembled the global snapshot
    GlobalSnapshotAssembled(GlobalSnapshot),

    /// A snapshot round timed out waiting for a marker or result and was
    /// dropped
    SnapshotAbandoned {
        /// Local round number
        round: u64,
        /// Initiator of the dropped round
        initiator: Address,
    },
}

impl ProcessEvent {
    /// Write this event to the log on behalf of process `id`.
    pub(crate) fn log(&self, id: ProcessId) {
        match self {
            Self::Started { address } => tracing::info!(process = id, "started on {}", address),
            Self::Stopped => tracing::info!(process = id, "stopped"),
            Self::InternalEvent { counter, clock } => {
                tracing::debug!(process = id, counter, clock, "local event");
            },
            Self::MessageSent { to, tag } => tracing::debug!(process = id, %to, %tag, "sent"),
            Self::MessageReceived { from, tag } => {
                tracing::debug!(process = id, %from, %tag, "received");
            },
            Self::SendFailed { to, tag, reason } => {
                tracing::warn!(process = id, %to, %tag, "send failed: {}", reason);
            },
            Self::ProtocolViolation { from, reason } => match from {
                Some(from) => tracing::warn!(process = id, %from, "rejected message: {}", reason),
                None => tracing::warn!(process = id, "rejected connection: {}", reason),
            },
            Self::CoordinatorFailureDetected { coordinator_id } => {
                tracing::warn!(process = id, "coordinator {} is unreachable", coordinator_id);
            },
            Self::ElectionStarted { algorithm, round } => {
                tracing::info!(process = id, %algorithm, round, "election started");
            },
            Self::ElectionDeferred { to } => {
                tracing::info!(process = id, "deferring to higher process {}", to);
            },
            Self::ElectedSelf { algorithm } => {
                tracing::info!(process = id, %algorithm, "elected self as coordinator");
            },
            Self::RingTokenReturned { token, coordinator_id } => {
                tracing::info!(process = id, ?token, "ring token returned, electing {}", coordinator_id);
            },
            Self::CoordinatorAcknowledged { coordinator_id, previous, algorithm } => {
                tracing::info!(
                    process = id,
                    %algorithm,
                    "coordinator is now {} (was {})",
                    coordinator_id,
                    previous
                );
            },
            Self::ElectionAbandoned { algorithm, round } => {
                tracing::warn!(process = id, %algorithm, round, "election abandoned");
            },
            Self::SnapshotRecorded(local) => {
                tracing::info!(
                    process = id,
                    counter = local.state.counter,
                    clock = local.clock,
                    "snapshot: local state recorded"
                );
            },
            Self::SnapshotCompleted(snapshot) => {
                tracing::info!(
                    process = id,
                    in_flight = snapshot.in_flight(),
                    "snapshot: all markers received"
                );
            },
            Self::GlobalSnapshotAssembled(global) => {
                tracing::info!(
                    process = id,
                    processes = global.len(),
                    in_flight = global.in_flight(),
                    "global snapshot assembled"
                );
                for (address, snapshot) in &global.processes {
                    tracing::info!(
                        process = id,
                        "  {} (process {}): counter={} clock={} status={:?}",
                        address,
                        snapshot.local.process_id,
                        snapshot.local.state.counter,
                        snapshot.local.clock,
                        snapshot.local.state.status
                    );
                    for (from, messages) in snapshot.channels.iter().filter(|(_, m)| !m.is_empty()) {
                        tracing::info!(process = id, "    in flight from {}: {:?}", from, messages);
                    }
                }
            },
            Self::SnapshotAbandoned { round, initiator } => {
                tracing::warn!(process = id, %initiator, round, "snapshot abandoned");
            },
        }
    }
}
