//! Leader election.
//!
//! Two interchangeable strategies share one [`Election`] state: the current
//! coordinator belief and whether an election is in flight.
//!
//! - [Bully](self::bully): contact every higher id; the highest live process
//!   announces itself.
//! - [Ring](self::ring): circulate a token around the id-ordered ring; the
//!   initiator picks the maximum id it collected.
//!
//! # Invariants
//!
//! - At most one election is in flight per process. Overlapping triggers
//!   collapse into the running one.
//! - `coordinator_id` starts at the highest known id and only changes when an
//!   election completes or an announcement arrives.
//! - Timeouts are tagged with a round number. A timeout for a round that is no
//!   longer current is ignored.

mod bully;
mod ring;

use std::fmt;

use cutpoint_proto::{Message, ProcessId, ProcessIdentity};

/// Which election algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElectionAlgorithm {
    /// Bully algorithm
    #[default]
    Bully,
    /// Ring algorithm
    Ring,
}

impl fmt::Display for ElectionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bully => f.write_str("bully"),
            Self::Ring => f.write_str("ring"),
        }
    }
}

/// Election phase of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No election in flight
    Idle,
    /// An election started by this process is in flight
    Electing {
        /// Algorithm being run
        algorithm: ElectionAlgorithm,
        /// Round number, used to match timeouts
        round: u64,
    },
}

/// Actions returned by [`Election`] for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionAction {
    /// Send a message to one peer.
    Send {
        /// Recipient
        to: ProcessIdentity,
        /// Message to send
        message: Message,
    },

    /// Deliver a message to the first reachable member of `route`, in order.
    Forward {
        /// Ring successors, nearest first
        route: Vec<ProcessIdentity>,
        /// Message to forward
        message: Message,
    },

    /// Wait for `ELECTION_OK`, then call [`Election::on_ok_timeout`].
    AwaitOk {
        /// Round to pass back
        round: u64,
    },

    /// Wait for the ring token, then call [`Election::on_token_timeout`].
    AwaitToken {
        /// Round to pass back
        round: u64,
    },

    /// This process started an election.
    Started {
        /// Algorithm
        algorithm: ElectionAlgorithm,
        /// Round number
        round: u64,
    },

    /// A higher process answered; this process stands down.
    Deferred {
        /// Process that answered
        to: ProcessId,
    },

    /// This process won and is announcing itself.
    Elected {
        /// Algorithm
        algorithm: ElectionAlgorithm,
    },

    /// A ring token came back to its initiator.
    TokenReturned {
        /// Ids the token collected, initiator first
        token: Vec<ProcessId>,
        /// Maximum id in the token
        coordinator_id: ProcessId,
    },

    /// This process adopted a coordinator.
    Acknowledged {
        /// New coordinator
        coordinator_id: ProcessId,
        /// Coordinator believed before
        previous: ProcessId,
        /// Algorithm that produced it
        algorithm: ElectionAlgorithm,
    },

    /// An election gave up without a result.
    Abandoned {
        /// Algorithm
        algorithm: ElectionAlgorithm,
        /// Round number
        round: u64,
    },
}

/// Per-process election state.
#[derive(Debug, Clone)]
pub struct Election {
    identity: ProcessIdentity,
    /// Peers sorted by id; never includes this process
    peers: Vec<ProcessIdentity>,
    coordinator_id: ProcessId,
    phase: Phase,
    rounds: u64,
}

impl Election {
    /// Create election state for `identity` among `peers`.
    ///
    /// The initial coordinator belief is the highest id in the group.
    pub fn new(identity: ProcessIdentity, peers: impl IntoIterator<Item = ProcessIdentity>) -> Self {
        let mut peers: Vec<_> = peers.into_iter().filter(|p| p.id != identity.id).collect();
        peers.sort_by_key(|p| p.id);
        peers.dedup_by_key(|p| p.id);

        let coordinator_id = peers.last().map_or(identity.id, |p| p.id.max(identity.id));

        Self { identity, peers, coordinator_id, phase: Phase::Idle, rounds: 0 }
    }

    /// This process's identity.
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Current coordinator belief.
    pub fn coordinator_id(&self) -> ProcessId {
        self.coordinator_id
    }

    /// True if this process believes it is the coordinator.
    pub fn is_coordinator(&self) -> bool {
        self.coordinator_id == self.identity.id
    }

    /// The believed coordinator, if it is a known peer.
    pub fn coordinator(&self) -> Option<&ProcessIdentity> {
        self.peer(self.coordinator_id)
    }

    /// Look up a peer by id.
    pub fn peer(&self, id: ProcessId) -> Option<&ProcessIdentity> {
        self.peers.binary_search_by_key(&id, |p| p.id).ok().map(|i| &self.peers[i])
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True if an election started by this process is in flight.
    pub fn in_progress(&self) -> bool {
        matches!(self.phase, Phase::Electing { .. })
    }

    /// Enter `Electing`, or return `None` if an election is already running.
    fn begin(&mut self, algorithm: ElectionAlgorithm) -> Option<u64> {
        if self.in_progress() {
            return None;
        }
        self.rounds += 1;
        self.phase = Phase::Electing { algorithm, round: self.rounds };
        Some(self.rounds)
    }

    fn finish(&mut self) {
        self.phase = Phase::Idle;
    }

    fn is_electing(&self, algorithm: ElectionAlgorithm, round: u64) -> bool {
        self.phase == Phase::Electing { algorithm, round }
    }

    fn acknowledge(
        &mut self,
        coordinator_id: ProcessId,
        algorithm: ElectionAlgorithm,
    ) -> ElectionAction {
        let previous = std::mem::replace(&mut self.coordinator_id, coordinator_id);
        ElectionAction::Acknowledged { coordinator_id, previous, algorithm }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn identity(id: ProcessId) -> ProcessIdentity {
        ProcessIdentity::new(id, format!("node-{id}:5000"))
    }

    /// Election state for `id` in a group of ids `1..=size`.
    pub(super) fn member(id: ProcessId, size: ProcessId) -> Election {
        Election::new(identity(id), (1..=size).map(identity))
    }

    #[test]
    fn initial_coordinator_is_highest_id() {
        let election = member(1, 3);
        assert_eq!(election.coordinator_id(), 3);
        assert!(!election.is_coordinator());
        assert_eq!(election.coordinator(), Some(&identity(3)));
    }

    #[test]
    fn highest_member_believes_itself_coordinator() {
        let election = member(3, 3);
        assert!(election.is_coordinator());
        assert_eq!(election.coordinator(), None);
    }

    #[test]
    fn lone_process_is_its_own_coordinator() {
        let election = Election::new(identity(7), []);
        assert!(election.is_coordinator());
    }

    #[test]
    fn own_identity_and_duplicates_are_dropped_from_peers() {
        let election =
            Election::new(identity(2), [identity(2), identity(1), identity(3), identity(1)]);
        assert_eq!(election.peer(1), Some(&identity(1)));
        assert_eq!(election.peer(2), None);
        assert_eq!(election.peers.len(), 2);
    }
}
