//! Bully election.
//!
//! ```text
//!            start_bully()
//!   Idle ───────────────────▶ Electing ──── ELECTION_OK ────▶ Idle (deferred)
//!    ▲                           │
//!    │                           │ on_ok_timeout(round)
//!    │                           ▼
//!    └──────────────────── Coordinator: broadcast COORDINATOR
//! ```
//!
//! A process with no higher peer wins immediately. A process that receives
//! `ELECTION` from a lower id answers `ELECTION_OK` and contends itself. A
//! process that hears `COORDINATOR` from a lower id also contends, so a
//! transient double announcement always settles on the highest live id.

use cutpoint_proto::{Message, ProcessId, ProcessIdentity};

use super::{Election, ElectionAction, ElectionAlgorithm};

const BULLY: ElectionAlgorithm = ElectionAlgorithm::Bully;

impl Election {
    /// Start a Bully election. No-op if one is already in flight.
    pub fn start_bully(&mut self) -> Vec<ElectionAction> {
        let Some(round) = self.begin(BULLY) else {
            return Vec::new();
        };

        let mut actions = vec![ElectionAction::Started { algorithm: BULLY, round }];

        let higher: Vec<_> = self.peers.iter().filter(|p| p.id > self.identity.id).cloned().collect();
        if higher.is_empty() {
            actions.extend(self.declare_victory());
            return actions;
        }

        let message =
            Message::Election { from: self.identity.address.clone(), from_id: self.identity.id };
        actions.extend(
            higher.into_iter().map(|to| ElectionAction::Send { to, message: message.clone() }),
        );
        actions.push(ElectionAction::AwaitOk { round });
        actions
    }

    /// Handle `ELECTION` from `from`.
    pub fn on_election(&mut self, from: ProcessIdentity) -> Vec<ElectionAction> {
        if from.id >= self.identity.id {
            tracing::debug!(
                "process {} ignoring ELECTION from non-lower process {}",
                self.identity.id,
                from.id
            );
            return Vec::new();
        }

        let reply =
            Message::ElectionOk { from: self.identity.address.clone(), from_id: self.identity.id };
        let mut actions = vec![ElectionAction::Send { to: from, message: reply }];
        actions.extend(self.start_bully());
        actions
    }

    /// Handle `ELECTION_OK` from `from_id`: a higher process is alive, stand
    /// down and wait for its announcement.
    pub fn on_election_ok(&mut self, from_id: ProcessId) -> Vec<ElectionAction> {
        if from_id <= self.identity.id {
            return Vec::new();
        }
        match self.phase {
            super::Phase::Electing { algorithm: ElectionAlgorithm::Bully, .. } => {
                self.finish();
                vec![ElectionAction::Deferred { to: from_id }]
            },
            _ => Vec::new(),
        }
    }

    /// Handle `COORDINATOR` from `from_id`.
    pub fn on_coordinator(&mut self, from_id: ProcessId) -> Vec<ElectionAction> {
        self.finish();
        let mut actions = vec![self.acknowledge(from_id, BULLY)];

        if from_id < self.identity.id {
            tracing::info!(
                "process {} outranks announced coordinator {}, contending",
                self.identity.id,
                from_id
            );
            actions.extend(self.start_bully());
        }
        actions
    }

    /// No `ELECTION_OK` arrived for `round` within the wait: take over.
    pub fn on_ok_timeout(&mut self, round: u64) -> Vec<ElectionAction> {
        if self.is_electing(BULLY, round) {
            self.declare_victory()
        } else {
            Vec::new()
        }
    }

    fn declare_victory(&mut self) -> Vec<ElectionAction> {
        self.finish();

        let mut actions = vec![
            ElectionAction::Elected { algorithm: BULLY },
            self.acknowledge(self.identity.id, BULLY),
        ];

        let message =
            Message::Coordinator { from: self.identity.address.clone(), from_id: self.identity.id };
        actions.extend(
            self.peers
                .iter()
                .map(|to| ElectionAction::Send { to: to.clone(), message: message.clone() }),
        );
        actions
    }
}
