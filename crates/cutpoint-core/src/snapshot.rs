//! Chandy-Lamport global snapshots.
//!
//! A round starts on a process either by self-initiation or by the first
//! `MARKER` it sees. At that moment the runtime captures the local state and
//! the process broadcasts markers on every outgoing channel. Each incoming
//! channel then records application messages until its own marker arrives.
//!
//! ```text
//!   capture ──▶ MARKER to all ──▶ record APP per channel ──▶ marker on every
//!                                  until that channel's        channel: round
//!                                  marker arrives              complete
//! ```
//!
//! Participants send their [`ProcessSnapshot`] to the initiator, which merges
//! them with its own into a [`GlobalSnapshot`].
//!
//! # Invariants
//!
//! - At most one round is active per process. The initiator stays busy until
//!   the global snapshot is assembled, not just until its own round ends.
//! - A channel never records after its marker has arrived. The channel the
//!   first marker came in on records nothing.
//! - Channels are FIFO. Markers and application messages from one sender must
//!   reach this state machine in the order they were sent.
//! - Every round is numbered locally. A crashed peer never sends its marker
//!   or result, so the runtime arms a timer per round and calls
//!   [`SnapshotState::on_timeout`], which drops whatever that round still
//!   holds open.

use std::collections::{BTreeMap, BTreeSet};

use cutpoint_proto::{Address, LocalSnapshot, Message, ProcessSnapshot, RecordedMessage};
use thiserror::Error;

/// Errors from the snapshot state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// A round or a collection is already in progress on this process.
    #[error("snapshot already active")]
    AlreadyActive,

    /// Message came from an address that is not a known peer.
    #[error("no channel from {0}")]
    UnknownChannel(Address),

    /// A snapshot result arrived at a process that is not collecting.
    #[error("unexpected snapshot result from {from}")]
    NotCollecting {
        /// Sender of the result
        from: Address,
    },

    /// The first marker of a round arrived without a captured local state.
    #[error("first marker of a round needs a local snapshot")]
    LocalStateMissing,
}

/// Actions returned by [`SnapshotState`] for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotAction {
    /// Send the message to every peer, in channel order with application
    /// traffic.
    Broadcast(Message),

    /// Send a message to one process.
    Send {
        /// Recipient
        to: Address,
        /// Message to send
        message: Message,
    },

    /// Local state was captured for a new round.
    Recorded(LocalSnapshot),

    /// Every incoming channel delivered its marker.
    Completed(ProcessSnapshot),

    /// The initiator holds every process's contribution.
    Assembled(GlobalSnapshot),

    /// Arm a timer, then call [`SnapshotState::on_timeout`].
    AwaitCompletion {
        /// Round to pass back
        round: u64,
    },

    /// A round timed out before it finished and was dropped.
    Abandoned {
        /// Round number
        round: u64,
        /// Initiator of the dropped round
        initiator: Address,
    },
}

/// A consistent cut of the whole group, assembled at the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSnapshot {
    /// Process that started the round
    pub initiator: Address,
    /// Contribution of each process, keyed by its address
    pub processes: BTreeMap<Address, ProcessSnapshot>,
}

impl GlobalSnapshot {
    /// Number of processes in the snapshot.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// True if no process contributed.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Contribution of the process at `address`.
    pub fn process(&self, address: &Address) -> Option<&ProcessSnapshot> {
        self.processes.get(address)
    }

    /// Messages in flight from `from` to `to` at the cut.
    pub fn channel(&self, from: &Address, to: &Address) -> &[RecordedMessage] {
        self.processes
            .get(to)
            .and_then(|p| p.channels.get(from))
            .map_or(&[], Vec::as_slice)
    }

    /// Total messages in flight across every channel.
    pub fn in_flight(&self) -> usize {
        self.processes.values().map(ProcessSnapshot::in_flight).sum()
    }
}

#[derive(Debug, Clone, Default)]
struct Channel {
    marker_received: bool,
    recorded: Vec<RecordedMessage>,
}

#[derive(Debug, Clone)]
struct Round {
    number: u64,
    initiator: Address,
    local: LocalSnapshot,
    channels: BTreeMap<Address, Channel>,
}

#[derive(Debug, Clone, Default)]
struct Collector {
    round: u64,
    own: Option<ProcessSnapshot>,
    collected: BTreeMap<Address, ProcessSnapshot>,
}

/// Per-process snapshot state.
#[derive(Debug, Clone)]
pub struct SnapshotState {
    address: Address,
    peers: BTreeSet<Address>,
    round: Option<Round>,
    collector: Option<Collector>,
    rounds: u64,
}

impl SnapshotState {
    /// Create idle snapshot state for the process at `address`.
    pub fn new(address: Address, peers: impl IntoIterator<Item = Address>) -> Self {
        let peers = peers.into_iter().filter(|p| *p != address).collect();
        Self { address, peers, round: None, collector: None, rounds: 0 }
    }

    /// True while a round or a collection is in progress.
    pub fn is_active(&self) -> bool {
        self.round.is_some() || self.collector.is_some()
    }

    /// True if the next marker starts a round and needs a captured local
    /// state.
    pub fn needs_local_capture(&self) -> bool {
        self.round.is_none()
    }

    /// True if an application message from `from` would be recorded now.
    pub fn is_recording(&self, from: &Address) -> bool {
        self.round
            .as_ref()
            .and_then(|r| r.channels.get(from))
            .is_some_and(|c| !c.marker_received)
    }

    /// Initiator of the active round, if any.
    pub fn initiator(&self) -> Option<&Address> {
        self.round.as_ref().map(|r| &r.initiator)
    }

    /// Start a round from this process with the captured `local` state.
    ///
    /// # Errors
    ///
    /// - `AlreadyActive` if a round or collection is in progress.
    pub fn initiate(&mut self, local: LocalSnapshot) -> Result<Vec<SnapshotAction>, SnapshotError> {
        if self.is_active() {
            return Err(SnapshotError::AlreadyActive);
        }

        self.collector = Some(Collector { round: self.rounds + 1, ..Collector::default() });
        let initiator = self.address.clone();
        Ok(self.open(initiator, local, None))
    }

    /// Handle a `MARKER` on the channel from `from`.
    ///
    /// `local` must be `Some` when [`Self::needs_local_capture`] is true and
    /// is ignored otherwise.
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if `from` is not a peer.
    /// - `LocalStateMissing` if this marker opens a round and `local` is
    ///   `None`.
    pub fn on_marker(
        &mut self,
        from: &Address,
        initiator: &Address,
        local: Option<LocalSnapshot>,
    ) -> Result<Vec<SnapshotAction>, SnapshotError> {
        if !self.peers.contains(from) {
            return Err(SnapshotError::UnknownChannel(from.clone()));
        }

        match self.round.as_mut() {
            Some(round) => {
                if let Some(channel) = round.channels.get_mut(from) {
                    channel.marker_received = true;
                }
                Ok(self.try_complete())
            },
            None => {
                let local = local.ok_or(SnapshotError::LocalStateMissing)?;
                Ok(self.open(initiator.clone(), local, Some(from)))
            },
        }
    }

    /// Record an application message from `from` if its channel is still
    /// open. Returns true if it was recorded.
    pub fn record(&mut self, from: &Address, payload: &str, timestamp: u64) -> bool {
        let Some(channel) = self
            .round
            .as_mut()
            .and_then(|r| r.channels.get_mut(from))
            .filter(|c| !c.marker_received)
        else {
            return false;
        };

        channel.recorded.push(RecordedMessage { payload: payload.to_string(), timestamp });
        true
    }

    /// Handle a `SNAPSHOT_RESULT` from a participant.
    ///
    /// # Errors
    ///
    /// - `NotCollecting` if this process did not initiate the active round.
    /// - `UnknownChannel` if `from` is not a peer.
    pub fn on_result(
        &mut self,
        from: &Address,
        snapshot: ProcessSnapshot,
    ) -> Result<Vec<SnapshotAction>, SnapshotError> {
        let Some(collector) = self.collector.as_mut() else {
            return Err(SnapshotError::NotCollecting { from: from.clone() });
        };
        if !self.peers.contains(from) {
            return Err(SnapshotError::UnknownChannel(from.clone()));
        }

        collector.collected.insert(from.clone(), snapshot);
        Ok(self.try_assemble())
    }

    /// The timer for `round` expired. Drops the round and, on the initiator,
    /// the collection if either is still open. Stale rounds are ignored.
    pub fn on_timeout(&mut self, round: u64) -> Vec<SnapshotAction> {
        let mut initiator = None;
        if self.round.as_ref().is_some_and(|r| r.number == round) {
            initiator = self.round.take().map(|r| r.initiator);
        }
        if self.collector.as_ref().is_some_and(|c| c.round == round) {
            self.collector = None;
            initiator = Some(self.address.clone());
        }

        match initiator {
            Some(initiator) => vec![SnapshotAction::Abandoned { round, initiator }],
            None => Vec::new(),
        }
    }

    fn open(
        &mut self,
        initiator: Address,
        local: LocalSnapshot,
        first_marker: Option<&Address>,
    ) -> Vec<SnapshotAction> {
        let channels = self
            .peers
            .iter()
            .map(|peer| {
                let marker_received = Some(peer) == first_marker;
                (peer.clone(), Channel { marker_received, recorded: Vec::new() })
            })
            .collect();

        self.rounds += 1;
        let number = self.rounds;

        let mut actions = vec![SnapshotAction::Recorded(local.clone())];
        if !self.peers.is_empty() {
            actions.push(SnapshotAction::Broadcast(Message::Marker {
                from: self.address.clone(),
                initiator: initiator.clone(),
            }));
            actions.push(SnapshotAction::AwaitCompletion { round: number });
        }

        self.round = Some(Round { number, initiator, local, channels });
        actions.extend(self.try_complete());
        actions
    }

    fn try_complete(&mut self) -> Vec<SnapshotAction> {
        let done = self.round.as_ref().is_some_and(|r| r.channels.values().all(|c| c.marker_received));
        if !done {
            return Vec::new();
        }
        let Some(round) = self.round.take() else {
            return Vec::new();
        };

        let snapshot = ProcessSnapshot {
            local: round.local,
            channels: round.channels.into_iter().map(|(peer, c)| (peer, c.recorded)).collect(),
        };
        let mut actions = vec![SnapshotAction::Completed(snapshot.clone())];

        if round.initiator == self.address {
            if let Some(collector) = self.collector.as_mut() {
                collector.own = Some(snapshot);
            }
            actions.extend(self.try_assemble());
        } else {
            actions.push(SnapshotAction::Send {
                to: round.initiator,
                message: Message::SnapshotResult { from: self.address.clone(), snapshot },
            });
        }
        actions
    }

    fn try_assemble(&mut self) -> Vec<SnapshotAction> {
        let ready = self.collector.as_ref().is_some_and(|c| {
            c.own.is_some() && self.peers.iter().all(|p| c.collected.contains_key(p))
        });
        if !ready {
            return Vec::new();
        }
        let Some(Collector { own: Some(own), mut collected, .. }) = self.collector.take() else {
            return Vec::new();
        };

        collected.insert(self.address.clone(), own);
        vec![SnapshotAction::Assembled(GlobalSnapshot {
            initiator: self.address.clone(),
            processes: collected,
        })]
    }
}

#[cfg(test)]
mod tests {
    use cutpoint_proto::{ApplicationState, Status};

    use super::*;

    fn addr(n: u64) -> Address {
        Address::new(format!("node-{n}:5000"))
    }

    fn local(n: u64, counter: u64, clock: u64) -> LocalSnapshot {
        LocalSnapshot {
            process_id: n,
            state: ApplicationState { counter, status: Status::On },
            clock,
        }
    }

    /// Snapshot state for `n` in a group of `1..=size`.
    fn member(n: u64, size: u64) -> SnapshotState {
        SnapshotState::new(addr(n), (1..=size).map(addr))
    }

    fn completed(actions: &[SnapshotAction]) -> Option<&ProcessSnapshot> {
        actions.iter().find_map(|a| match a {
            SnapshotAction::Completed(s) => Some(s),
            _ => None,
        })
    }

    fn assembled(actions: &[SnapshotAction]) -> Option<&GlobalSnapshot> {
        actions.iter().find_map(|a| match a {
            SnapshotAction::Assembled(g) => Some(g),
            _ => None,
        })
    }

    #[test]
    fn initiate_captures_and_broadcasts_marker() {
        let mut state = member(1, 3);
        let actions = state.initiate(local(1, 4, 9)).expect("initiate");

        assert_eq!(
            actions,
            vec![
                SnapshotAction::Recorded(local(1, 4, 9)),
                SnapshotAction::Broadcast(Message::Marker { from: addr(1), initiator: addr(1) }),
                SnapshotAction::AwaitCompletion { round: 1 },
            ]
        );
        assert!(state.is_active());
        assert!(state.is_recording(&addr(2)));
        assert!(state.is_recording(&addr(3)));
    }

    #[test]
    fn second_initiate_is_rejected() {
        let mut state = member(1, 3);
        state.initiate(local(1, 0, 1)).expect("first round");
        assert_eq!(state.initiate(local(1, 0, 2)), Err(SnapshotError::AlreadyActive));
    }

    #[test]
    fn lone_process_completes_immediately() {
        let mut state = SnapshotState::new(addr(1), []);
        let actions = state.initiate(local(1, 2, 5)).expect("initiate");

        let global = assembled(&actions).expect("assembled");
        assert_eq!(global.len(), 1);
        assert_eq!(global.process(&addr(1)).map(|p| p.local.clock), Some(5));
        assert!(!actions.iter().any(|a| matches!(a, SnapshotAction::Broadcast(_))));
        assert!(!state.is_active());
    }

    #[test]
    fn channel_records_until_its_marker() {
        let mut state = member(1, 3);
        state.initiate(local(1, 0, 1)).expect("initiate");

        assert!(state.record(&addr(2), "before marker", 3));
        state.on_marker(&addr(2), &addr(1), None).expect("marker");
        assert!(!state.record(&addr(2), "after marker", 4));
        assert!(state.record(&addr(3), "still open", 5));

        let actions = state.on_marker(&addr(3), &addr(1), None).expect("marker");
        let snapshot = completed(&actions).expect("completed");
        assert_eq!(
            snapshot.channels[&addr(2)],
            vec![RecordedMessage { payload: "before marker".into(), timestamp: 3 }]
        );
        assert_eq!(snapshot.channels[&addr(3)].len(), 1);
    }

    #[test]
    fn nothing_is_recorded_while_idle() {
        let mut state = member(2, 3);
        assert!(!state.record(&addr(1), "idle", 1));
        assert!(state.needs_local_capture());
    }

    #[test]
    fn first_marker_opens_round_and_closes_its_channel() {
        let mut state = member(2, 3);
        let actions = state.on_marker(&addr(1), &addr(1), Some(local(2, 7, 11))).expect("marker");

        assert_eq!(
            actions,
            vec![
                SnapshotAction::Recorded(local(2, 7, 11)),
                SnapshotAction::Broadcast(Message::Marker { from: addr(2), initiator: addr(1) }),
                SnapshotAction::AwaitCompletion { round: 1 },
            ]
        );
        assert!(!state.is_recording(&addr(1)));
        assert!(state.is_recording(&addr(3)));
        assert_eq!(state.initiator(), Some(&addr(1)));
    }

    #[test]
    fn participant_sends_result_to_initiator() {
        let mut state = member(2, 3);
        state.on_marker(&addr(1), &addr(1), Some(local(2, 0, 3))).expect("first marker");
        state.record(&addr(3), "in flight", 6);

        let actions = state.on_marker(&addr(3), &addr(1), None).expect("last marker");

        let Some(SnapshotAction::Send { to, message: Message::SnapshotResult { from, snapshot } }) =
            actions.last()
        else {
            panic!("expected result to initiator, got {actions:?}");
        };
        assert_eq!(to, &addr(1));
        assert_eq!(from, &addr(2));
        assert_eq!(snapshot.in_flight(), 1);
        assert!(!state.is_active());
    }

    #[test]
    fn first_marker_without_local_state_is_rejected() {
        let mut state = member(2, 3);
        assert_eq!(
            state.on_marker(&addr(1), &addr(1), None),
            Err(SnapshotError::LocalStateMissing)
        );
        assert!(!state.is_active());
    }

    #[test]
    fn marker_from_stranger_is_rejected() {
        let mut state = member(2, 3);
        assert_eq!(
            state.on_marker(&addr(9), &addr(1), Some(local(2, 0, 0))),
            Err(SnapshotError::UnknownChannel(addr(9)))
        );
    }

    #[test]
    fn result_without_collection_is_rejected() {
        let mut state = member(2, 3);
        let snapshot = ProcessSnapshot { local: local(1, 0, 0), channels: BTreeMap::new() };
        assert_eq!(
            state.on_result(&addr(1), snapshot),
            Err(SnapshotError::NotCollecting { from: addr(1) })
        );
    }

    #[test]
    fn initiator_assembles_after_every_result() {
        let mut state = member(1, 3);
        state.initiate(local(1, 1, 1)).expect("initiate");
        state.on_marker(&addr(2), &addr(1), None).expect("marker");
        let actions = state.on_marker(&addr(3), &addr(1), None).expect("marker");
        assert!(completed(&actions).is_some());
        assert!(assembled(&actions).is_none());
        assert!(state.is_active(), "collector keeps the round busy");

        let result = |n| ProcessSnapshot {
            local: local(n, 0, 0),
            channels: [(addr(1), vec![RecordedMessage { payload: format!("to {n}"), timestamp: 2 }])]
                .into(),
        };

        assert!(state.on_result(&addr(3), result(3)).expect("result").is_empty());
        let actions = state.on_result(&addr(2), result(2)).expect("result");

        let global = assembled(&actions).expect("assembled");
        assert_eq!(global.len(), 3);
        assert_eq!(global.initiator, addr(1));
        assert_eq!(global.channel(&addr(1), &addr(2))[0].payload, "to 2");
        assert_eq!(global.in_flight(), 2);
        assert!(!state.is_active());
        assert!(state.initiate(local(1, 2, 2)).is_ok(), "next round may start");
    }

    #[test]
    fn initiator_gives_up_on_a_silent_peer() {
        let mut state = member(1, 3);
        state.initiate(local(1, 0, 0)).expect("initiate");
        state.on_marker(&addr(2), &addr(1), None).expect("marker");
        let result = ProcessSnapshot { local: local(2, 0, 0), channels: BTreeMap::new() };
        state.on_result(&addr(2), result).expect("result");

        // 3 never answers.
        assert_eq!(
            state.on_timeout(1),
            vec![SnapshotAction::Abandoned { round: 1, initiator: addr(1) }]
        );
        assert!(!state.is_active());
        assert!(state.initiate(local(1, 1, 4)).is_ok(), "next round may start");
    }

    #[test]
    fn initiator_with_completed_round_still_abandons_collection() {
        let mut state = member(1, 2);
        state.initiate(local(1, 0, 0)).expect("initiate");
        let actions = state.on_marker(&addr(2), &addr(1), None).expect("marker");
        assert!(completed(&actions).is_some());
        assert!(state.is_active());

        assert_eq!(state.on_timeout(1).len(), 1);
        assert!(!state.is_active());
    }

    #[test]
    fn participant_drops_round_missing_a_marker() {
        let mut state = member(2, 3);
        state.on_marker(&addr(1), &addr(1), Some(local(2, 0, 0))).expect("first marker");
        assert!(state.is_recording(&addr(3)));

        assert_eq!(
            state.on_timeout(1),
            vec![SnapshotAction::Abandoned { round: 1, initiator: addr(1) }]
        );
        assert!(!state.is_active());
        assert!(state.needs_local_capture());
    }

    #[test]
    fn stale_timeout_is_ignored() {
        let mut state = member(2, 2);
        state.on_marker(&addr(1), &addr(1), Some(local(2, 0, 0))).expect("completes at once");
        assert!(!state.is_active());
        assert!(state.on_timeout(1).is_empty());

        state.on_marker(&addr(1), &addr(1), Some(local(2, 1, 1))).expect("second round");
        assert!(state.on_timeout(1).is_empty(), "round 1 is long gone");
    }

    #[test]
    fn results_may_arrive_before_own_completion() {
        let mut state = member(1, 2);
        state.initiate(local(1, 0, 0)).expect("initiate");

        let early = ProcessSnapshot { local: local(2, 0, 0), channels: BTreeMap::new() };
        assert!(state.on_result(&addr(2), early).expect("result").is_empty());

        let actions = state.on_marker(&addr(2), &addr(1), None).expect("marker");
        assert_eq!(assembled(&actions).map(GlobalSnapshot::len), Some(2));
    }
}
