//! Ring election.
//!
//! Members are ordered by id into a fixed ring over the full known group. The
//! ring does not shrink when members fail: a forwarding step carries the
//! successor list and the runtime skips members that cannot be reached.
//!
//! A forwarded message never travels past its initiator. The route ends at
//! the initiator, so a dead initiator exhausts the route and the message is
//! dropped. A token that comes back to a member already in it is dropped too.
//!
//! ```text
//!  initiator P: token [P] ──▶ next ──▶ ... ──▶ P   (token returned)
//!  P: coordinator = max(token), RING_COORDINATOR ──▶ next ──▶ ... ──▶ P (stop)
//! ```

use cutpoint_proto::{Message, ProcessId, ProcessIdentity};

use super::{Election, ElectionAction, ElectionAlgorithm};

const RING: ElectionAlgorithm = ElectionAlgorithm::Ring;

impl Election {
    /// Ring successors of this process, nearest first, wrapping around.
    ///
    /// Computed over the full known group, not the live members.
    pub fn ring_successors(&self) -> Vec<ProcessIdentity> {
        let split = self.peers.partition_point(|p| p.id < self.identity.id);
        let (before, after) = self.peers.split_at(split);
        after.iter().chain(before).cloned().collect()
    }

    /// Ring successors up to and including `initiator`.
    ///
    /// Equal to [`Self::ring_successors`] when this process is the initiator.
    fn route_towards(&self, initiator: ProcessId) -> Vec<ProcessIdentity> {
        let me = self.identity.id;
        // Ids above this process come first in ring order, then the wrapped ones.
        let position = |id: ProcessId| (id <= me, id);
        let stop = position(initiator);
        self.ring_successors().into_iter().filter(|p| position(p.id) <= stop).collect()
    }

    /// Start a Ring election. No-op if one is already in flight.
    pub fn start_ring(&mut self) -> Vec<ElectionAction> {
        let Some(round) = self.begin(RING) else {
            return Vec::new();
        };

        let mut actions = vec![ElectionAction::Started { algorithm: RING, round }];

        let route = self.ring_successors();
        if route.is_empty() {
            actions.extend(self.complete_ring(vec![self.identity.id]));
            return actions;
        }

        let message =
            Message::RingElection { from: self.identity.address.clone(), token: vec![self.identity.id] };
        actions.push(ElectionAction::Forward { route, message });
        actions.push(ElectionAction::AwaitToken { round });
        actions
    }

    /// Handle a `RING_ELECTION` token.
    ///
    /// A token that already carries this process but was started elsewhere
    /// has lapped a dead initiator and is dropped.
    pub fn on_ring_election(&mut self, mut token: Vec<ProcessId>) -> Vec<ElectionAction> {
        let Some(&initiator) = token.first() else {
            tracing::debug!(process = self.identity.id, "empty ring token dropped");
            return Vec::new();
        };

        if initiator == self.identity.id {
            return if token.len() > 1 { self.complete_ring(token) } else { Vec::new() };
        }
        if token.contains(&self.identity.id) {
            tracing::debug!(
                process = self.identity.id,
                ?token,
                "ring token already visited, dropped"
            );
            return Vec::new();
        }
        token.push(self.identity.id);

        let route = self.route_towards(initiator);
        if route.is_empty() {
            return Vec::new();
        }
        let message = Message::RingElection { from: self.identity.address.clone(), token };
        vec![ElectionAction::Forward { route, message }]
    }

    /// Handle a `RING_COORDINATOR` announcement.
    pub fn on_ring_coordinator(
        &mut self,
        coordinator_id: ProcessId,
        initiator: ProcessId,
    ) -> Vec<ElectionAction> {
        self.finish();
        let mut actions = vec![self.acknowledge(coordinator_id, RING)];

        if initiator != self.identity.id {
            let route = self.route_towards(initiator);
            if !route.is_empty() {
                let message = Message::RingCoordinator {
                    from: self.identity.address.clone(),
                    coordinator_id,
                    initiator,
                };
                actions.push(ElectionAction::Forward { route, message });
            }
        }
        actions
    }

    /// Every member on a forwarding route for `message` was unreachable.
    ///
    /// If this was our own fresh token, nobody else is alive and this process
    /// elects itself. Anything else, including a message whose initiator has
    /// died, is dropped.
    pub fn on_route_exhausted(&mut self, message: &Message) -> Vec<ElectionAction> {
        match message {
            Message::RingElection { token, .. }
                if token[..] == [self.identity.id]
                    && matches!(self.phase, super::Phase::Electing { algorithm: RING, .. }) =>
            {
                self.complete_ring(token.clone())
            },
            _ => Vec::new(),
        }
    }

    /// The token for `round` did not return in time: give up so a later
    /// trigger can retry.
    pub fn on_token_timeout(&mut self, round: u64) -> Vec<ElectionAction> {
        if self.is_electing(RING, round) {
            self.finish();
            vec![ElectionAction::Abandoned { algorithm: RING, round }]
        } else {
            Vec::new()
        }
    }

    fn complete_ring(&mut self, token: Vec<ProcessId>) -> Vec<ElectionAction> {
        let coordinator_id = token.iter().copied().max().unwrap_or(self.identity.id);
        self.finish();

        let mut actions = vec![
            ElectionAction::TokenReturned { token, coordinator_id },
            self.acknowledge(coordinator_id, RING),
        ];
        if coordinator_id == self.identity.id {
            actions.push(ElectionAction::Elected { algorithm: RING });
        }

        let route = self.ring_successors();
        if !route.is_empty() {
            let message = Message::RingCoordinator {
                from: self.identity.address.clone(),
                coordinator_id,
                initiator: self.identity.id,
            };
            actions.push(ElectionAction::Forward { route, message });
        }
        actions
    }
}
