//! Model cluster: core state machines wired together by in-memory queues.

use std::collections::{BTreeMap, VecDeque};

use cutpoint_core::{
    clock::LamportClock,
    election::{Election, ElectionAction},
    snapshot::{GlobalSnapshot, SnapshotAction, SnapshotState},
};
use cutpoint_proto::{
    Address, ApplicationState, LocalSnapshot, Message, ProcessId, ProcessIdentity,
};

use super::operation::{NodeIndex, Operation};
use crate::scenario::identities;

/// Upper bound on steps [`ModelCluster::settle`] takes before giving up.
const SETTLE_LIMIT: usize = 100_000;

/// `APP` counts per channel.
///
/// Kept running for every member and copied when the member captures its
/// local state for a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cut {
    /// `APP` messages sent to each peer
    pub sent: BTreeMap<Address, u64>,
    /// `APP` messages received from each peer
    pub received: BTreeMap<Address, u64>,
}

#[derive(Debug, Clone, Copy)]
enum Timeout {
    Ok(u64),
    Token(u64),
}

#[derive(Debug)]
struct Member {
    identity: ProcessIdentity,
    alive: bool,
    clock: LamportClock,
    app: ApplicationState,
    election: Election,
    snapshot: SnapshotState,
    counts: Cut,
    cut: Option<Cut>,
}

/// A whole cluster in memory. Member `i` has id `i + 1`.
#[derive(Debug)]
pub struct ModelCluster {
    members: Vec<Member>,
    channels: BTreeMap<(usize, usize), VecDeque<Message>>,
    timeouts: VecDeque<(usize, Timeout)>,
    snapshot_timers: VecDeque<(usize, u64)>,
    abandoned: usize,
    assembled: Vec<GlobalSnapshot>,
    elected: Vec<ProcessId>,
    token_returns: Vec<Vec<ProcessId>>,
    violations: Vec<String>,
}

impl ModelCluster {
    /// Create a cluster of `size` live members with no traffic.
    pub fn new(size: usize) -> Self {
        let group = identities(size as u64);
        let members = group
            .iter()
            .map(|identity| Member {
                identity: identity.clone(),
                alive: true,
                clock: LamportClock::new(),
                app: ApplicationState::default(),
                election: Election::new(identity.clone(), group.iter().cloned()),
                snapshot: SnapshotState::new(
                    identity.address.clone(),
                    group.iter().map(|p| p.address.clone()),
                ),
                counts: Cut::default(),
                cut: None,
            })
            .collect();

        Self {
            members,
            channels: BTreeMap::new(),
            timeouts: VecDeque::new(),
            snapshot_timers: VecDeque::new(),
            abandoned: 0,
            assembled: Vec::new(),
            elected: Vec::new(),
            token_returns: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the cluster has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Id of member `index`.
    pub fn id(&self, index: usize) -> ProcessId {
        self.members[index].identity.id
    }

    /// Address of member `index`.
    pub fn address(&self, index: usize) -> &Address {
        &self.members[index].identity.address
    }

    /// Apply one operation. Returns false if it had no effect.
    pub fn apply(&mut self, operation: Operation) -> bool {
        match operation {
            Operation::Tick { node } => self.tick(self.wrap(node)),
            Operation::Deliver { from, to } => self.deliver(self.wrap(from), self.wrap(to)),
            Operation::InitiateSnapshot { node } => self.initiate_snapshot(self.wrap(node)),
            Operation::TriggerBully { node } => self.trigger_bully(self.wrap(node)),
            Operation::TriggerRing { node } => self.trigger_ring(self.wrap(node)),
            Operation::FireTimeout => self.fire_timeout(),
        }
    }

    /// Crash member `index`. Messages to it are dropped from now on.
    pub fn kill(&mut self, index: usize) {
        self.members[index].alive = false;
    }

    /// True if member `index` has not been killed.
    pub fn is_alive(&self, index: usize) -> bool {
        self.members[index].alive
    }

    /// Local event on member `index`: advance clock and counter, broadcast
    /// `APP`.
    pub fn tick(&mut self, index: usize) -> bool {
        if !self.members[index].alive {
            return false;
        }

        let peers = self.peers_of(index);
        let member = &mut self.members[index];
        member.clock.increment();
        member.app.counter += 1;
        let timestamp = member.clock.increment();
        let message = Message::App {
            from: member.identity.address.clone(),
            timestamp,
            payload: format!("msg from {}", member.identity.id),
        };

        for peer in peers {
            let to = self.members[peer].identity.address.clone();
            *self.members[index].counts.sent.entry(to).or_default() += 1;
            self.enqueue(index, peer, message.clone());
        }
        true
    }

    /// Start a snapshot at member `index`. False if one is already active.
    pub fn initiate_snapshot(&mut self, index: usize) -> bool {
        if !self.members[index].alive || self.members[index].snapshot.is_active() {
            return false;
        }

        let local = self.capture(index);
        match self.members[index].snapshot.initiate(local) {
            Ok(actions) => {
                self.execute_snapshot(index, actions);
                true
            },
            Err(e) => {
                self.violations.push(format!("member {index}: {e}"));
                false
            },
        }
    }

    /// Start a Bully election at member `index`.
    pub fn trigger_bully(&mut self, index: usize) -> bool {
        if !self.members[index].alive {
            return false;
        }
        let actions = self.members[index].election.start_bully();
        let started = !actions.is_empty();
        self.execute_election(index, actions);
        started
    }

    /// Start a Ring election at member `index`.
    pub fn trigger_ring(&mut self, index: usize) -> bool {
        if !self.members[index].alive {
            return false;
        }
        let actions = self.members[index].election.start_ring();
        let started = !actions.is_empty();
        self.execute_election(index, actions);
        started
    }

    /// Deliver the oldest message from `from` to `to`. False if none queued.
    pub fn deliver(&mut self, from: usize, to: usize) -> bool {
        let Some(message) = self.channels.get_mut(&(from, to)).and_then(VecDeque::pop_front) else {
            return false;
        };
        if self.members[to].alive {
            self.handle(to, message);
        }
        true
    }

    /// Fire the oldest pending election timeout. False if none is pending.
    pub fn fire_timeout(&mut self) -> bool {
        let Some((index, timeout)) = self.timeouts.pop_front() else {
            return false;
        };
        if self.members[index].alive {
            let election = &mut self.members[index].election;
            let actions = match timeout {
                Timeout::Ok(round) => election.on_ok_timeout(round),
                Timeout::Token(round) => election.on_token_timeout(round),
            };
            self.execute_election(index, actions);
        }
        true
    }

    /// Expire every armed snapshot timer. Rounds still open are abandoned.
    ///
    /// Only safe once no marker or result is in flight: a marker delivered
    /// after its round was dropped opens a fresh one.
    pub fn expire_snapshots(&mut self) -> bool {
        if self.snapshot_timers.is_empty() {
            return false;
        }
        while let Some((index, round)) = self.snapshot_timers.pop_front() {
            if self.members[index].alive {
                let actions = self.members[index].snapshot.on_timeout(round);
                self.execute_snapshot(index, actions);
            }
        }
        true
    }

    /// Deliver every queued message, firing election timeouts only when no
    /// message is left and snapshot timers only when nothing else is, until
    /// the cluster is quiet. False if it never quiets down.
    pub fn settle(&mut self) -> bool {
        for _ in 0..SETTLE_LIMIT {
            let next = self.channels.iter().find(|(_, queue)| !queue.is_empty()).map(|(k, _)| *k);
            match next {
                Some((from, to)) => {
                    self.deliver(from, to);
                },
                None => {
                    if !self.fire_timeout() && !self.expire_snapshots() {
                        return true;
                    }
                },
            }
        }
        false
    }

    /// Messages queued across all channels.
    pub fn in_flight(&self) -> usize {
        self.channels.values().map(VecDeque::len).sum()
    }

    /// Coordinator belief of member `index`.
    pub fn coordinator(&self, index: usize) -> ProcessId {
        self.members[index].election.coordinator_id()
    }

    /// True if member `index` has a snapshot round or collection open.
    pub fn snapshot_active(&self, index: usize) -> bool {
        self.members[index].snapshot.is_active()
    }

    /// `APP` counts of member `index` at its last capture.
    pub fn cut(&self, index: usize) -> Option<&Cut> {
        self.members[index].cut.as_ref()
    }

    /// Snapshot rounds dropped by a timer, across all members.
    pub fn abandoned(&self) -> usize {
        self.abandoned
    }

    /// Global snapshots assembled so far.
    pub fn assembled(&self) -> &[GlobalSnapshot] {
        &self.assembled
    }

    /// Ids that declared themselves coordinator, in order.
    pub fn elected(&self) -> &[ProcessId] {
        &self.elected
    }

    /// Ring tokens that returned to their initiator.
    pub fn token_returns(&self) -> &[Vec<ProcessId>] {
        &self.token_returns
    }

    /// Messages the state machines rejected.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Check `global` against the members' captured counts.
    ///
    /// For every channel `a → b`, the `APP` messages `a` sent before its
    /// capture must equal those `b` received before its capture plus those
    /// recorded in flight. Every recorded message must carry a timestamp no
    /// later than the sender's captured clock.
    pub fn check_snapshot(&self, global: &GlobalSnapshot) -> Result<(), String> {
        if global.len() != self.members.len() {
            return Err(format!("{} of {} processes in snapshot", global.len(), self.members.len()));
        }

        for (a, sender) in self.members.iter().enumerate() {
            for (b, receiver) in self.members.iter().enumerate().filter(|(b, _)| *b != a) {
                let (Some(sender_cut), Some(receiver_cut)) = (&sender.cut, &receiver.cut) else {
                    return Err(format!("member {a} or {b} never captured"));
                };
                let from = &sender.identity.address;
                let to = &receiver.identity.address;

                let sent = sender_cut.sent.get(to).copied().unwrap_or(0);
                let received = receiver_cut.received.get(from).copied().unwrap_or(0);
                let channel = global.channel(from, to);
                if sent != received + channel.len() as u64 {
                    return Err(format!(
                        "channel {from} -> {to}: sent {sent}, received {received}, in flight {}",
                        channel.len()
                    ));
                }

                let Some(sender_clock) = global.process(from).map(|p| p.local.clock) else {
                    return Err(format!("{from} missing from snapshot"));
                };
                if let Some(late) = channel.iter().find(|m| m.timestamp > sender_clock) {
                    return Err(format!(
                        "channel {from} -> {to}: message at {} recorded after sender cut at {}",
                        late.timestamp, sender_clock
                    ));
                }
            }
        }
        Ok(())
    }

    fn wrap(&self, node: NodeIndex) -> usize {
        usize::from(node) % self.members.len()
    }

    fn peers_of(&self, index: usize) -> Vec<usize> {
        (0..self.members.len()).filter(|&j| j != index).collect()
    }

    fn index_of(&self, address: &Address) -> Option<usize> {
        self.members.iter().position(|m| m.identity.address == *address)
    }

    fn enqueue(&mut self, from: usize, to: usize, message: Message) {
        self.channels.entry((from, to)).or_default().push_back(message);
    }

    fn capture(&mut self, index: usize) -> LocalSnapshot {
        let member = &mut self.members[index];
        member.cut = Some(member.counts.clone());
        LocalSnapshot { process_id: member.identity.id, state: member.app, clock: member.clock.time() }
    }

    fn handle(&mut self, index: usize, message: Message) {
        match message {
            Message::App { from, timestamp, payload } => {
                let member = &mut self.members[index];
                member.clock.update(timestamp);
                member.clock.increment();
                *member.counts.received.entry(from.clone()).or_default() += 1;
                member.snapshot.record(&from, &payload, timestamp);
            },
            Message::Marker { from, initiator } => {
                let local =
                    self.members[index].snapshot.needs_local_capture().then(|| self.capture(index));
                match self.members[index].snapshot.on_marker(&from, &initiator, local) {
                    Ok(actions) => self.execute_snapshot(index, actions),
                    Err(e) => self.violations.push(format!("member {index}: {e}")),
                }
            },
            Message::SnapshotResult { from, snapshot } => {
                match self.members[index].snapshot.on_result(&from, snapshot) {
                    Ok(actions) => self.execute_snapshot(index, actions),
                    Err(e) => self.violations.push(format!("member {index}: {e}")),
                }
            },
            Message::Election { from, from_id } => {
                let from = ProcessIdentity::new(from_id, from);
                let actions = self.members[index].election.on_election(from);
                self.execute_election(index, actions);
            },
            Message::ElectionOk { from_id, .. } => {
                let actions = self.members[index].election.on_election_ok(from_id);
                self.execute_election(index, actions);
            },
            Message::Coordinator { from_id, .. } => {
                let actions = self.members[index].election.on_coordinator(from_id);
                self.execute_election(index, actions);
            },
            Message::RingElection { token, .. } => {
                let actions = self.members[index].election.on_ring_election(token);
                self.execute_election(index, actions);
            },
            Message::RingCoordinator { coordinator_id, initiator, .. } => {
                let actions =
                    self.members[index].election.on_ring_coordinator(coordinator_id, initiator);
                self.execute_election(index, actions);
            },
        }
    }

    fn execute_snapshot(&mut self, index: usize, actions: Vec<SnapshotAction>) {
        for action in actions {
            match action {
                SnapshotAction::Broadcast(message) => {
                    for peer in self.peers_of(index) {
                        self.enqueue(index, peer, message.clone());
                    }
                },
                SnapshotAction::Send { to, message } => {
                    if let Some(peer) = self.index_of(&to) {
                        self.enqueue(index, peer, message);
                    }
                },
                SnapshotAction::Assembled(global) => self.assembled.push(global),
                SnapshotAction::AwaitCompletion { round } => {
                    self.snapshot_timers.push_back((index, round));
                },
                SnapshotAction::Abandoned { .. } => self.abandoned += 1,
                SnapshotAction::Recorded(_) | SnapshotAction::Completed(_) => {},
            }
        }
    }

    fn execute_election(&mut self, index: usize, actions: Vec<ElectionAction>) {
        for action in actions {
            match action {
                ElectionAction::Send { to, message } => {
                    if let Some(peer) = self.index_of(&to.address) {
                        self.enqueue(index, peer, message);
                    }
                },
                ElectionAction::Forward { route, message } => {
                    let next = route
                        .iter()
                        .filter_map(|hop| self.index_of(&hop.address))
                        .find(|&peer| self.members[peer].alive);
                    match next {
                        Some(peer) => self.enqueue(index, peer, message),
                        None => {
                            let more = self.members[index].election.on_route_exhausted(&message);
                            self.execute_election(index, more);
                        },
                    }
                },
                ElectionAction::AwaitOk { round } => {
                    self.timeouts.push_back((index, Timeout::Ok(round)));
                },
                ElectionAction::AwaitToken { round } => {
                    self.timeouts.push_back((index, Timeout::Token(round)));
                },
                ElectionAction::Elected { .. } => self.elected.push(self.members[index].identity.id),
                ElectionAction::TokenReturned { token, .. } => self.token_returns.push(token),
                ElectionAction::Started { .. }
                | ElectionAction::Deferred { .. }
                | ElectionAction::Acknowledged { .. }
                | ElectionAction::Abandoned { .. } => {},
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_queue_app_for_every_peer() {
        let mut cluster = ModelCluster::new(3);
        cluster.tick(0);
        assert_eq!(cluster.in_flight(), 2);
        assert!(cluster.deliver(0, 1));
        assert!(!cluster.deliver(0, 1));
    }

    #[test]
    fn settled_snapshot_is_conserved() {
        let mut cluster = ModelCluster::new(3);
        cluster.tick(0);
        cluster.tick(1);
        cluster.deliver(1, 2);
        assert!(cluster.initiate_snapshot(2));
        cluster.tick(0);
        assert!(cluster.settle());

        assert_eq!(cluster.assembled().len(), 1);
        cluster.check_snapshot(&cluster.assembled()[0]).expect("consistent");
        assert!(cluster.violations().is_empty());
    }

    #[test]
    fn dead_members_drop_their_mail() {
        let mut cluster = ModelCluster::new(2);
        cluster.kill(1);
        cluster.tick(0);
        assert!(cluster.deliver(0, 1));
        assert!(!cluster.tick(1));
        assert!(!cluster.is_alive(1));
    }

    #[test]
    fn crashed_peer_does_not_block_later_snapshots() {
        let mut cluster = ModelCluster::new(3);
        cluster.kill(2);
        assert!(cluster.initiate_snapshot(0));
        assert!(cluster.settle());

        assert!(cluster.assembled().is_empty());
        assert_eq!(cluster.abandoned(), 2, "initiator and participant both give up");
        assert!(!cluster.snapshot_active(0));
        assert!(!cluster.snapshot_active(1));
        assert!(cluster.initiate_snapshot(0), "survivors can run another round");
    }

    #[test]
    fn operations_wrap_node_indices() {
        let mut cluster = ModelCluster::new(2);
        assert!(cluster.apply(Operation::Tick { node: 7 }));
        assert_eq!(cluster.in_flight(), 1);
        assert!(cluster.apply(Operation::Deliver { from: 3, to: 2 }));
    }
}
