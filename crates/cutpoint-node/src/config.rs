//! Process configuration.
//!
//! Every interval the runtime uses is a named constant here so timing can be
//! tuned in one place and scaled down in tests.

use std::{collections::BTreeSet, time::Duration};

use cutpoint_core::election::ElectionAlgorithm;
use cutpoint_proto::{Address, ProcessIdentity};

use crate::error::NodeError;

/// Interval between local events (and their `APP` broadcasts).
pub const DEFAULT_EVENT_INTERVAL: Duration = Duration::from_secs(2);

/// Interval between coordinator liveness probes.
pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_secs(5);

/// How long a Bully contender waits for `ELECTION_OK`.
pub const DEFAULT_ELECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Bound on connecting to a peer, and on reading one inbound frame.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a ring initiator waits for its token to come back.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a snapshot round may wait for its markers and results.
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(15);

/// Messages queued per peer before new ones are dropped.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

/// Events buffered for slow subscribers before they start lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

/// Runtime configuration for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Interval between local events
    pub event_interval: Duration,
    /// Interval between coordinator probes
    pub detection_interval: Duration,
    /// Bully wait for `ELECTION_OK`
    pub election_timeout: Duration,
    /// Connect and read timeout
    pub connect_timeout: Duration,
    /// Ring wait for the token
    pub token_timeout: Duration,
    /// Snapshot wait for markers and results
    pub snapshot_timeout: Duration,
    /// Per-peer outbox capacity
    pub outbox_capacity: usize,
    /// Event channel capacity
    pub event_capacity: usize,
    /// Algorithm run when the coordinator is found dead
    pub election: ElectionAlgorithm,
    /// Probe the coordinator periodically
    pub failure_detection: bool,
    /// Run an election right after starting (a recovered process reclaiming
    /// its place)
    pub elect_on_start: bool,
    /// Only this process may initiate snapshots, if set
    pub snapshot_coordinator: Option<Address>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            event_interval: DEFAULT_EVENT_INTERVAL,
            detection_interval: DEFAULT_DETECTION_INTERVAL,
            election_timeout: DEFAULT_ELECTION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            election: ElectionAlgorithm::Bully,
            failure_detection: true,
            elect_on_start: false,
            snapshot_coordinator: None,
        }
    }
}

impl ProcessConfig {
    /// Set the local event interval.
    #[must_use]
    pub fn with_event_interval(mut self, interval: Duration) -> Self {
        self.event_interval = interval;
        self
    }

    /// Set the coordinator probe interval.
    #[must_use]
    pub fn with_detection_interval(mut self, interval: Duration) -> Self {
        self.detection_interval = interval;
        self
    }

    /// Set the Bully `ELECTION_OK` wait.
    #[must_use]
    pub fn with_election_timeout(mut self, timeout: Duration) -> Self {
        self.election_timeout = timeout;
        self
    }

    /// Set the connect and read timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the ring token wait.
    #[must_use]
    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    /// Set how long a snapshot round waits before it is abandoned.
    #[must_use]
    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    /// Choose the algorithm failure detection triggers.
    #[must_use]
    pub fn with_election(mut self, algorithm: ElectionAlgorithm) -> Self {
        self.election = algorithm;
        self
    }

    /// Enable or disable coordinator probing.
    #[must_use]
    pub fn with_failure_detection(mut self, enabled: bool) -> Self {
        self.failure_detection = enabled;
        self
    }

    /// Run an election immediately after start.
    #[must_use]
    pub fn with_elect_on_start(mut self, enabled: bool) -> Self {
        self.elect_on_start = enabled;
        self
    }

    /// Restrict snapshot initiation to `coordinator`.
    #[must_use]
    pub fn with_snapshot_coordinator(mut self, coordinator: Address) -> Self {
        self.snapshot_coordinator = Some(coordinator);
        self
    }

    /// Check this configuration for a process `identity` among `peers`.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Config` if:
    /// - An interval, timeout or capacity is zero
    /// - A peer shares this process's id or address
    /// - Two peers share an id or an address
    pub fn validate(
        &self,
        identity: &ProcessIdentity,
        peers: &[ProcessIdentity],
    ) -> Result<(), NodeError> {
        let durations = [
            ("event_interval", self.event_interval),
            ("detection_interval", self.detection_interval),
            ("election_timeout", self.election_timeout),
            ("connect_timeout", self.connect_timeout),
            ("token_timeout", self.token_timeout),
            ("snapshot_timeout", self.snapshot_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(NodeError::Config(format!("{name} must be non-zero")));
        }
        if self.outbox_capacity == 0 || self.event_capacity == 0 {
            return Err(NodeError::Config("channel capacities must be non-zero".to_string()));
        }

        let mut ids = BTreeSet::from([identity.id]);
        let mut addresses = BTreeSet::from([&identity.address]);
        for peer in peers {
            if !ids.insert(peer.id) {
                return Err(NodeError::Config(format!("duplicate process id {}", peer.id)));
            }
            if !addresses.insert(&peer.address) {
                return Err(NodeError::Config(format!("duplicate address {}", peer.address)));
            }
        }
        Ok(())
    }
}
