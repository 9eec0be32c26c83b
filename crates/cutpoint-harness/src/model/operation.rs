//! Operations for model-based testing.
//!
//! Operations are generated randomly (by proptest or a fuzzer) and applied to
//! a [`super::ModelCluster`]. Node indices wrap modulo the cluster size so
//! any generated value is meaningful.

use arbitrary::Arbitrary;

/// Member index (0-indexed, wraps modulo cluster size).
pub type NodeIndex = u8;

/// One step of a model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Member generates a local event and broadcasts `APP`.
    Tick {
        /// Member
        node: NodeIndex,
    },

    /// Deliver the oldest message queued from `from` to `to`.
    Deliver {
        /// Sender
        from: NodeIndex,
        /// Receiver
        to: NodeIndex,
    },

    /// Member initiates a snapshot.
    InitiateSnapshot {
        /// Member
        node: NodeIndex,
    },

    /// Member starts a Bully election.
    TriggerBully {
        /// Member
        node: NodeIndex,
    },

    /// Member starts a Ring election.
    TriggerRing {
        /// Member
        node: NodeIndex,
    },

    /// Fire the oldest pending election timeout.
    FireTimeout,
}
